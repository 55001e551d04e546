// crates/capgate-core/src/runtime/cidr.rs
// ============================================================================
// Module: CIDR Blocks
// Description: Parsing and containment checks for allow/deny address lists.
// Purpose: Match client addresses against configured networks.
// Dependencies: std, thiserror
// ============================================================================

//! ## Overview
//! Entries are written as `addr/prefix` or as a bare address (a single-host
//! block). Host bits beyond the prefix are masked off, so `10.1.2.3/8` and
//! `10.0.0.0/8` describe the same network. IPv4-mapped IPv6 clients are
//! matched against IPv4 blocks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::str::FromStr;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CIDR parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrParseError {
    /// Address portion is not a valid IP address.
    #[error("invalid network address: {0}")]
    Address(String),
    /// Prefix length is not a number or exceeds the address width.
    #[error("invalid prefix length: {0}")]
    Prefix(String),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// IP network in CIDR notation.
///
/// # Invariants
/// - `network` has every bit beyond `prefix` cleared.
/// - `prefix` never exceeds 32 for IPv4 or 128 for IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrBlock {
    /// Masked network address.
    network: IpAddr,
    /// Prefix length in bits.
    prefix: u8,
}

impl CidrBlock {
    /// Builds a block, masking host bits.
    ///
    /// # Errors
    ///
    /// Returns [`CidrParseError::Prefix`] when `prefix` exceeds the address width.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, CidrParseError> {
        let network = match addr {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(CidrParseError::Prefix(prefix.to_string()));
                }
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix)))
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(CidrParseError::Prefix(prefix.to_string()));
                }
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix)))
            }
        };
        Ok(Self {
            network,
            prefix,
        })
    }

    /// Returns the masked network address.
    #[must_use]
    pub const fn network(&self) -> IpAddr {
        self.network
    }

    /// Returns the prefix length.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Returns true when the address falls inside the block.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr.to_canonical()) {
            (IpAddr::V4(network), IpAddr::V4(candidate)) => {
                u32::from(candidate) & v4_mask(self.prefix) == u32::from(network)
            }
            (IpAddr::V6(network), IpAddr::V6(candidate)) => {
                u128::from(candidate) & v6_mask(self.prefix) == u128::from(network)
            }
            _ => false,
        }
    }
}

impl FromStr for CidrBlock {
    type Err = CidrParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (addr_text, prefix_text) = match value.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (value, None),
        };
        let addr: IpAddr =
            addr_text.parse().map_err(|_| CidrParseError::Address(addr_text.to_string()))?;
        let prefix = match prefix_text {
            Some(text) => {
                text.parse::<u8>().map_err(|_| CidrParseError::Prefix(text.to_string()))?
            }
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        Self::new(addr, prefix)
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the IPv4 netmask for a prefix length.
const fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - prefix as u32) }
}

/// Returns the IPv6 netmask for a prefix length.
const fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 { 0 } else { u128::MAX << (128 - prefix as u32) }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::expect_used, reason = "Test-only parse assertions.")]
mod tests {
    use super::*;

    fn block(text: &str) -> CidrBlock {
        text.parse().expect("valid cidr")
    }

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn bare_address_is_single_host() {
        let single = block("192.168.1.10");
        assert_eq!(single.prefix(), 32);
        assert!(single.contains(v4(192, 168, 1, 10)));
        assert!(!single.contains(v4(192, 168, 1, 11)));
    }

    #[test]
    fn host_bits_are_masked() {
        let net = block("10.1.2.3/8");
        assert_eq!(net.to_string(), "10.0.0.0/8");
        assert!(net.contains(v4(10, 200, 0, 1)));
        assert!(!net.contains(v4(11, 0, 0, 1)));
    }

    #[test]
    fn zero_prefix_matches_everything_in_family() {
        let any = block("0.0.0.0/0");
        assert!(any.contains(v4(8, 8, 8, 8)));
        assert!(!any.contains(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))));
    }

    #[test]
    fn mapped_ipv6_matches_ipv4_block() {
        let net = block("127.0.0.0/8");
        let mapped = IpAddr::V6(Ipv4Addr::new(127, 0, 0, 1).to_ipv6_mapped());
        assert!(net.contains(mapped));
    }

    #[test]
    fn ipv6_blocks_match() {
        let net = block("2001:db8::/32");
        assert!(net.contains(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0xffff, 0, 0, 0, 0, 9))));
        assert!(!net.contains(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb9, 0, 0, 0, 0, 0, 1))));
    }

    #[test]
    fn rejects_bad_entries() {
        assert!(matches!("10.0.0.0/33".parse::<CidrBlock>(), Err(CidrParseError::Prefix(_))));
        assert!(matches!("10.0.0/8".parse::<CidrBlock>(), Err(CidrParseError::Address(_))));
        assert!(matches!("::/200".parse::<CidrBlock>(), Err(CidrParseError::Prefix(_))));
        assert!(matches!("10.0.0.0/x".parse::<CidrBlock>(), Err(CidrParseError::Prefix(_))));
    }
}
