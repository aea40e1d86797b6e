//! Allow/deny list evaluation.

use std::net::IpAddr;
use tracing::warn;

use super::entry::AccessListEntry;

/// Classification of a client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// On the allow list: bypasses rate limiting entirely.
    Allowed,
    /// On the deny list: blocked outright.
    Denied,
    /// On neither list: subject to the limiter.
    Unclassified,
}

/// Parsed allow/deny lists.
///
/// Allow is checked first and takes precedence: an address on both lists is
/// always allowed. Malformed entries are skipped with a warning rather than
/// failing evaluation.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    allow: Vec<AccessListEntry>,
    deny: Vec<AccessListEntry>,
}

impl AccessList {
    /// Parse both lists, skipping entries that fail to parse.
    pub fn parse(allow: &[String], deny: &[String]) -> Self {
        Self {
            allow: parse_entries(allow, "allow"),
            deny: parse_entries(deny, "deny"),
        }
    }

    /// Classify a client address.
    pub fn classify(&self, addr: IpAddr) -> Access {
        if self.allow.iter().any(|entry| entry.matches(addr)) {
            return Access::Allowed;
        }
        if self.deny.iter().any(|entry| entry.matches(addr)) {
            return Access::Denied;
        }
        Access::Unclassified
    }

    /// Parsed entry counts as (allow, deny), for construction-time sanity
    /// reporting.
    pub fn entry_counts(&self) -> (usize, usize) {
        (self.allow.len(), self.deny.len())
    }
}

fn parse_entries(specs: &[String], list: &'static str) -> Vec<AccessListEntry> {
    specs
        .iter()
        .filter_map(|spec| {
            let parsed = AccessListEntry::parse(spec);
            if parsed.is_none() {
                warn!(list = list, entry = %spec, "Skipping malformed access list entry");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn list(specs: &[&str]) -> Vec<String> {
        specs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allow_takes_precedence_over_deny() {
        let access = AccessList::parse(&list(&["192.0.2.7"]), &list(&["192.0.2.0/24"]));
        assert_eq!(access.classify(addr("192.0.2.7")), Access::Allowed);
        assert_eq!(access.classify(addr("192.0.2.8")), Access::Denied);
    }

    #[test]
    fn test_unlisted_address_is_unclassified() {
        let access = AccessList::parse(&list(&["10.0.0.0/8"]), &list(&["172.16.0.0/12"]));
        assert_eq!(access.classify(addr("198.51.100.1")), Access::Unclassified);
    }

    #[test]
    fn test_empty_lists_classify_nothing() {
        let access = AccessList::default();
        assert_eq!(access.classify(addr("192.0.2.1")), Access::Unclassified);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let access = AccessList::parse(
            &list(&["garbage", "10.0.0.0/8"]),
            &list(&["10.0.0.0/99", "192.0.2.0/24"]),
        );
        assert_eq!(access.entry_counts(), (1, 1));
        assert_eq!(access.classify(addr("10.1.2.3")), Access::Allowed);
        assert_eq!(access.classify(addr("192.0.2.30")), Access::Denied);
    }

    #[test]
    fn test_v6_classification() {
        let access = AccessList::parse(&list(&["2001:db8::/32"]), &[]);
        assert_eq!(access.classify(addr("2001:db8::42")), Access::Allowed);
        assert_eq!(access.classify(addr("2001:db9::42")), Access::Unclassified);
    }
}
