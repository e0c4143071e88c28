//! IPv4 address validation and formatting.
//!
//! Connections are labelled with the dotted-decimal form of their peer
//! address, and the configured bind host goes through the same validation.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Address validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty address string provided")]
    Empty,
    #[error("invalid IPv4 address: {0}")]
    Invalid(String),
    #[error("not an IPv4 peer: {0}")]
    NotIpv4(SocketAddr),
}

/// A validated IPv4 address.
///
/// Holds both representations so neither has to be recomputed when a
/// connection is logged or a message is attributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Address {
    text: String,
    raw: u32,
}

impl Ipv4Address {
    /// Parse a dotted-decimal address.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        if text.is_empty() {
            return Err(AddressError::Empty);
        }
        let addr: Ipv4Addr = text
            .parse()
            .map_err(|_| AddressError::Invalid(text.to_string()))?;
        Ok(Self::from(addr))
    }

    /// Build an address from its host-order integer form.
    pub fn from_raw(raw: u32) -> Self {
        Self::from(Ipv4Addr::from(raw))
    }

    /// Extract the address of an accepted peer.
    pub fn from_socket_addr(addr: SocketAddr) -> Result<Self, AddressError> {
        match addr {
            SocketAddr::V4(v4) => Ok(Self::from(*v4.ip())),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(v4) => Ok(Self::from(v4)),
                None => Err(AddressError::NotIpv4(addr)),
            },
        }
    }

    /// Dotted-decimal representation.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Host-order integer representation.
    pub fn raw(&self) -> u32 {
        self.raw
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Self {
            text: addr.to_string(),
            raw: u32::from(addr),
        }
    }
}

impl From<&Ipv4Address> for Ipv4Addr {
    fn from(addr: &Ipv4Address) -> Self {
        Ipv4Addr::from(addr.raw())
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
