//! Host and IP matching logic

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::IpAddr;
use wildmatch::WildMatch;

/// Matcher for hosts and IP addresses.
///
/// Patterns are compared against normalized hostnames: lowercase, no
/// trailing dot. Callers normalize before asking.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    patterns: Vec<WildMatch>,
    ipv4_ranges: Vec<Ipv4Net>,
    ipv6_ranges: Vec<Ipv6Net>,
}

impl HostMatcher {
    /// Create a new empty matcher
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            ipv4_ranges: Vec::new(),
            ipv6_ranges: Vec::new(),
        }
    }

    /// Add a wildcard pattern for host matching
    pub fn add_pattern(&mut self, pattern: &str) {
        let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
        self.patterns.push(WildMatch::new(&pattern));
    }

    /// Add an IPv4 CIDR range
    pub fn add_ipv4_range(&mut self, range: Ipv4Net) {
        self.ipv4_ranges.push(range);
    }

    /// Add an IPv6 CIDR range
    pub fn add_ipv6_range(&mut self, range: Ipv6Net) {
        self.ipv6_ranges.push(range);
    }

    /// Add a range of either family
    pub fn add_range(&mut self, range: IpNet) {
        match range {
            IpNet::V4(net) => self.add_ipv4_range(net),
            IpNet::V6(net) => self.add_ipv6_range(net),
        }
    }

    /// Check if a hostname matches any pattern
    pub fn matches_host(&self, host: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(host))
    }

    /// Check if an IP address matches any range
    pub fn matches_ip(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ipv4) => self.ipv4_ranges.iter().any(|net| net.contains(&ipv4)),
            IpAddr::V6(ipv6) => self.ipv6_ranges.iter().any(|net| net.contains(&ipv6)),
        }
    }

    /// Check if either hostname or IP matches
    pub fn matches(&self, host: &str, ip: Option<IpAddr>) -> bool {
        if self.matches_host(host) {
            return true;
        }

        if let Some(addr) = ip {
            return self.matches_ip(addr);
        }

        false
    }

    /// Check if matcher has any patterns or ranges
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.ipv4_ranges.is_empty() && self.ipv6_ranges.is_empty()
    }
}

impl Default for HostMatcher {
    fn default() -> Self {
        Self::new()
    }
}
