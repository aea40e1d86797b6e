//! Allow/deny list entries: IP literals and CIDR blocks.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One allow/deny specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessListEntry {
    /// Exact address equality.
    Literal(IpAddr),
    /// CIDR network containment. The stored address is pre-masked to the
    /// network base so matching is a single mask-and-compare.
    Network { network: IpAddr, prefix: u8 },
}

impl AccessListEntry {
    /// Parse an IP literal or an `address/prefix` CIDR spec.
    ///
    /// Returns `None` for anything malformed; the caller decides whether to
    /// skip or report.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }
        match spec.split_once('/') {
            None => spec.parse::<IpAddr>().ok().map(Self::Literal),
            Some((addr, prefix)) => {
                let addr = addr.parse::<IpAddr>().ok()?;
                let prefix = prefix.parse::<u8>().ok()?;
                let max_prefix = match addr {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                if prefix > max_prefix {
                    return None;
                }
                Some(Self::Network {
                    network: mask_address(addr, prefix),
                    prefix,
                })
            }
        }
    }

    /// Whether `addr` matches this entry. Address families never match
    /// across each other.
    pub fn matches(&self, addr: IpAddr) -> bool {
        match self {
            Self::Literal(ip) => *ip == addr,
            Self::Network { network, prefix } => match (network, addr) {
                (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                    mask_address(addr, *prefix) == *network
                }
                _ => false,
            },
        }
    }
}

/// Zero the host bits of `addr` below the prefix.
fn mask_address(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_literal_match() {
        let entry = AccessListEntry::parse("192.0.2.7").unwrap();
        assert!(entry.matches(addr("192.0.2.7")));
        assert!(!entry.matches(addr("192.0.2.8")));
    }

    #[test]
    fn test_v4_network_boundaries() {
        let entry = AccessListEntry::parse("10.0.0.0/24").unwrap();
        assert!(entry.matches(addr("10.0.0.0")));
        assert!(entry.matches(addr("10.0.0.255")));
        assert!(!entry.matches(addr("10.0.1.0")));
        assert!(!entry.matches(addr("9.255.255.255")));
    }

    #[test]
    fn test_v4_host_prefix() {
        let entry = AccessListEntry::parse("203.0.113.9/32").unwrap();
        assert!(entry.matches(addr("203.0.113.9")));
        assert!(!entry.matches(addr("203.0.113.10")));
    }

    #[test]
    fn test_zero_prefix_matches_whole_family() {
        let entry = AccessListEntry::parse("0.0.0.0/0").unwrap();
        assert!(entry.matches(addr("198.51.100.14")));
        assert!(!entry.matches(addr("2001:db8::1")));
    }

    #[test]
    fn test_unmasked_network_spec_is_normalized() {
        // Host bits set in the spec still describe the same network.
        let entry = AccessListEntry::parse("10.0.0.77/24").unwrap();
        assert!(entry.matches(addr("10.0.0.1")));
        assert!(!entry.matches(addr("10.0.1.1")));
    }

    #[test]
    fn test_v6_network_boundaries() {
        let entry = AccessListEntry::parse("2001:db8::/32").unwrap();
        assert!(entry.matches(addr("2001:db8::1")));
        assert!(entry.matches(addr("2001:db8:ffff:ffff:ffff:ffff:ffff:ffff")));
        assert!(!entry.matches(addr("2001:db9::1")));
    }

    #[test]
    fn test_v6_literal() {
        let entry = AccessListEntry::parse("2001:db8::7").unwrap();
        assert!(entry.matches(addr("2001:db8::7")));
        assert!(!entry.matches(addr("2001:db8::8")));
    }

    #[test]
    fn test_families_never_cross_match() {
        let entry = AccessListEntry::parse("::/0").unwrap();
        assert!(entry.matches(addr("2001:db8::1")));
        assert!(!entry.matches(addr("192.0.2.1")));
    }

    #[test]
    fn test_malformed_specs_rejected() {
        assert_eq!(AccessListEntry::parse(""), None);
        assert_eq!(AccessListEntry::parse("not-an-ip"), None);
        assert_eq!(AccessListEntry::parse("10.0.0.0/33"), None);
        assert_eq!(AccessListEntry::parse("2001:db8::/129"), None);
        assert_eq!(AccessListEntry::parse("10.0.0.0/"), None);
        assert_eq!(AccessListEntry::parse("10.0.0.0/abc"), None);
        assert_eq!(AccessListEntry::parse("10.0.0/24"), None);
    }

    #[test]
    fn test_surrounding_whitespace_tolerated() {
        let entry = AccessListEntry::parse("  192.0.2.7 ").unwrap();
        assert!(entry.matches(addr("192.0.2.7")));
    }
}
