mod error;
pub mod invariant;

pub use error::{err, Error, Result};
