// Invariant breaches (transaction IDs going backwards, an unknown event
// kind, a peer ID reused after promotion, ...) are not recoverable: we log
// the violated invariant and then terminate the process, the same
// CHECK()-or-die discipline the original engine uses throughout.

use tracing::error;

#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::invariant::fail(format!($($arg)+));
        }
    };
}

#[doc(hidden)]
#[track_caller]
pub fn fail(message: String) -> ! {
    error!(target: "drift", "invariant violated: {}", message);
    panic!("invariant violated: {}", message);
}
