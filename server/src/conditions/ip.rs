//! IP pattern matching for whitelist/blacklist conditions.
//!
//! A pattern is either a literal address (`10.0.0.5`, `2001:db8::1`) or CIDR
//! notation (`10.0.0.0/8`, `2001:db8::/32`), compared with a bitwise subnet
//! mask. Malformed patterns match nothing.

use std::net::IpAddr;

/// Test an address against a literal or CIDR pattern.
#[must_use]
pub fn ip_matches(ip: IpAddr, pattern: &str) -> bool {
    let pattern = pattern.trim();

    if let Some((network, prefix)) = pattern.split_once('/') {
        let Ok(prefix_len) = prefix.parse::<u32>() else {
            return false;
        };
        let Ok(network) = network.parse::<IpAddr>() else {
            return false;
        };
        return cidr_contains(network, prefix_len, ip);
    }

    pattern.parse::<IpAddr>().is_ok_and(|literal| literal == ip)
}

fn cidr_contains(network: IpAddr, prefix_len: u32, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            if prefix_len > 32 {
                return false;
            }
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - prefix_len)
            };
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            if prefix_len > 128 {
                return false;
            }
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - prefix_len)
            };
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        // Family mismatch never matches.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_literal_match() {
        assert!(ip_matches(ip("10.1.2.3"), "10.1.2.3"));
        assert!(!ip_matches(ip("10.1.2.4"), "10.1.2.3"));
        assert!(ip_matches(ip("2001:db8::1"), "2001:db8::1"));
    }

    #[test]
    fn test_cidr_v4() {
        assert!(ip_matches(ip("10.20.30.40"), "10.0.0.0/8"));
        assert!(!ip_matches(ip("11.0.0.1"), "10.0.0.0/8"));
        assert!(ip_matches(ip("192.168.1.200"), "192.168.1.0/24"));
        assert!(!ip_matches(ip("192.168.2.1"), "192.168.1.0/24"));
        assert!(ip_matches(ip("192.168.1.7"), "192.168.1.6/31"));
        assert!(!ip_matches(ip("192.168.1.8"), "192.168.1.6/31"));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_all() {
        assert!(ip_matches(ip("8.8.8.8"), "0.0.0.0/0"));
        assert!(ip_matches(ip("2001:db8::1"), "::/0"));
    }

    #[test]
    fn test_cidr_v6() {
        assert!(ip_matches(ip("2001:db8:aaaa::1"), "2001:db8::/32"));
        assert!(!ip_matches(ip("2001:db9::1"), "2001:db8::/32"));
    }

    #[test]
    fn test_family_mismatch_never_matches() {
        assert!(!ip_matches(ip("10.0.0.1"), "2001:db8::/32"));
        assert!(!ip_matches(ip("2001:db8::1"), "10.0.0.0/8"));
    }

    #[test]
    fn test_malformed_patterns_match_nothing() {
        for pattern in ["", "not-an-ip", "10.0.0.0/33", "10.0.0.0/x", "300.1.2.3", "2001:db8::/129"] {
            assert!(!ip_matches(ip("10.0.0.1"), pattern), "{pattern:?}");
        }
    }
}
