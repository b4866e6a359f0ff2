// Peer identifiers have the form "ip/<address>/<port>". Parsing is strict:
// three slash-separated fields, the last a decimal port in 0..=65535.

use std::fmt;

use drift_base::{err, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        PeerId(format!("ip/{}/{}", address.into(), port))
    }

    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let (address, port) = parse_address_port(&s)?;
        let _ = port; // validated below, not retained separately
        let _ = address;
        Ok(PeerId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn address_and_port(&self) -> Result<(String, u16)> {
        parse_address_port(&self.0)
    }
}

fn parse_address_port(s: &str) -> Result<(String, u16)> {
    let mut parts = s.split('/');
    let scheme = parts.next().ok_or_else(|| err("missing peer ID scheme"))?;
    if scheme != "ip" {
        return Err(err(format!("unsupported peer ID scheme: {scheme:?}")));
    }
    let address = parts
        .next()
        .ok_or_else(|| err("missing peer ID address"))?
        .to_string();
    if address.is_empty() {
        return Err(err("empty peer ID address"));
    }
    let port_str = parts.next().ok_or_else(|| err("missing peer ID port"))?;
    if parts.next().is_some() {
        return Err(err(format!("too many components in peer ID: {s:?}")));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| err(format!("invalid peer ID port: {port_str:?}")))?;
    Ok((address, port))
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
