//! CIDR prefixes for source-address matching.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer};
use thiserror::Error;

/// Prefix parsing errors.
#[derive(Debug, Error)]
pub enum PrefixError {
    /// Missing or malformed CIDR notation.
    #[error("invalid CIDR notation: {0}")]
    InvalidNotation(String),

    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Prefix length out of range for the address family.
    #[error("invalid prefix length {bits} for {addr}")]
    InvalidLength { addr: IpAddr, bits: u8 },
}

/// An IPv4 or IPv6 CIDR prefix.
///
/// The address is masked to the prefix length at construction, so two
/// prefixes covering the same network compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    addr: IpAddr,
    bits: u8,
}

impl Prefix {
    /// Create a new prefix, masking the address to the prefix length.
    pub fn new(addr: IpAddr, bits: u8) -> Result<Self, PrefixError> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if bits > max {
            return Err(PrefixError::InvalidLength { addr, bits });
        }
        let addr = match addr {
            IpAddr::V4(v4) => IpAddr::V4(mask_v4(v4, bits)),
            IpAddr::V6(v6) => IpAddr::V6(mask_v6(v6, bits)),
        };
        Ok(Self { addr, bits })
    }

    /// The network address of the prefix.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The prefix length.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// True if the address is within this prefix. Address families never
    /// match one another; callers should canonicalize mapped addresses
    /// first.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.addr, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => mask_v4(addr, self.bits) == net,
            (IpAddr::V6(net), IpAddr::V6(addr)) => mask_v6(addr, self.bits) == net,
            _ => false,
        }
    }

    /// The network address as bytes, for ordering.
    pub(crate) fn addr_octets(&self) -> Vec<u8> {
        match self.addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }
}

fn mask_v4(addr: Ipv4Addr, bits: u8) -> Ipv4Addr {
    let mask = if bits == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(bits))
    };
    Ipv4Addr::from(u32::from(addr) & mask)
}

fn mask_v6(addr: Ipv6Addr, bits: u8) -> Ipv6Addr {
    let mask = if bits == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(bits))
    };
    Ipv6Addr::from(u128::from(addr) & mask)
}

impl FromStr for Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((addr, bits)) = s.split_once('/') else {
            return Err(PrefixError::InvalidNotation(s.to_string()));
        };
        let addr = IpAddr::from_str(addr)
            .map_err(|_| PrefixError::InvalidAddress(addr.to_string()))?;
        let bits = bits
            .parse::<u8>()
            .map_err(|_| PrefixError::InvalidNotation(s.to_string()))?;
        Self::new(addr, bits)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.bits)
    }
}

impl<'de> Deserialize<'de> for Prefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let prefix: Prefix = "127.0.0.1/32".parse().unwrap();
        assert_eq!(prefix.bits(), 32);
        assert_eq!(prefix.to_string(), "127.0.0.1/32");

        let prefix: Prefix = "10.1.2.3/8".parse().unwrap();
        // The address is masked to the prefix.
        assert_eq!(prefix.to_string(), "10.0.0.0/8");

        let prefix: Prefix = "::1/128".parse().unwrap();
        assert_eq!(prefix.bits(), 128);

        assert!("127.0.0.1".parse::<Prefix>().is_err());
        assert!("not-an-ip/8".parse::<Prefix>().is_err());
        assert!("127.0.0.1/33".parse::<Prefix>().is_err());
        assert!("::1/129".parse::<Prefix>().is_err());
    }

    #[test]
    fn test_contains() {
        let prefix: Prefix = "10.0.0.0/8".parse().unwrap();
        assert!(prefix.contains("10.1.2.3".parse().unwrap()));
        assert!(!prefix.contains("11.0.0.1".parse().unwrap()));
        // Families never match one another.
        assert!(!prefix.contains("::1".parse().unwrap()));

        let prefix: Prefix = "2001:db8::/32".parse().unwrap();
        assert!(prefix.contains("2001:db8::1".parse().unwrap()));
        assert!(!prefix.contains("2001:db9::1".parse().unwrap()));

        let all: Prefix = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains("255.255.255.255".parse().unwrap()));
    }
}
