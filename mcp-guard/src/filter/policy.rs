//! Outbound request policy

use super::matcher::HostMatcher;
use crate::config::schema::{Config, HostGroup};
use crate::error::{ConfigError, ProxyError, Result};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// NAT64 well-known prefix (RFC 6052); the low 32 bits carry an IPv4 address.
const NAT64_PREFIX: [u16; 6] = [0x0064, 0xff9b, 0, 0, 0, 0];

/// Immutable policy deciding which outbound targets may be dialed.
///
/// Built once from configuration at startup and shared behind an `Arc`.
/// There are no setters.
#[derive(Debug, Clone)]
pub struct ProxyPolicy {
    allowed_schemes: HashSet<String>,
    blocked: HostMatcher,
    allowed: HostMatcher,
    blocked_ports: HashSet<u16>,
    max_redirects: u32,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
    connect_timeout: Duration,
    dns_timeout: Duration,
}

impl ProxyPolicy {
    /// Build the policy from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let policy = &config.policy;

        let mut blocked = HostMatcher::new();
        let mut allowed = HostMatcher::new();
        let mut processed = HashSet::new();

        for group_name in &policy.deny_groups {
            Self::expand_group(group_name, &config.groups, &mut blocked, &mut processed)?;
        }

        processed.clear();
        for group_name in &policy.allow_groups {
            Self::expand_group(group_name, &config.groups, &mut allowed, &mut processed)?;
        }

        for host in &policy.blocked_hosts {
            blocked.add_pattern(host);
        }
        for range_str in &policy.blocked_networks {
            let range = range_str
                .parse::<IpNet>()
                .map_err(|_| ConfigError::InvalidCidr {
                    cidr: range_str.clone(),
                })?;
            blocked.add_range(range);
        }
        for host in &policy.allowed_hosts {
            allowed.add_pattern(host);
        }

        // The relay must never be pointed back at itself. Interface
        // addresses behind an unspecified bind are not enumerated.
        let listen = config
            .server
            .listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidListen {
                addr: config.server.listen.clone(),
            })?;
        if !listen.ip().is_unspecified() {
            blocked.add_range(IpNet::from(listen.ip()));
        }

        let request_timeout = Duration::from_millis(policy.request_timeout_ms);
        let stream_idle_timeout = policy
            .stream_idle_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(request_timeout);

        Ok(Self {
            allowed_schemes: policy
                .allowed_schemes
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            blocked,
            allowed,
            blocked_ports: policy.blocked_ports.iter().copied().collect(),
            max_redirects: policy.max_redirects,
            request_timeout,
            stream_idle_timeout,
            connect_timeout: Duration::from_millis(policy.connect_timeout_ms),
            dns_timeout: Duration::from_millis(policy.dns_timeout_ms),
        })
    }

    /// Recursively expand a group and add its hosts/IPs to the matcher
    fn expand_group(
        group_name: &str,
        groups: &HashMap<String, HostGroup>,
        matcher: &mut HostMatcher,
        processed: &mut HashSet<String>,
    ) -> Result<()> {
        // Avoid reprocessing groups (handles DAG structure)
        if !processed.insert(group_name.to_string()) {
            return Ok(());
        }

        let group = groups
            .get(group_name)
            .ok_or_else(|| ProxyError::GroupNotFound {
                group: group_name.to_string(),
            })?;

        for host in &group.hosts {
            matcher.add_pattern(host);
        }

        for range_str in &group.ipv4_ranges {
            let range = range_str
                .parse::<Ipv4Net>()
                .map_err(|_| ConfigError::InvalidCidr {
                    cidr: range_str.clone(),
                })?;
            matcher.add_ipv4_range(range);
        }

        for range_str in &group.ipv6_ranges {
            let range = range_str
                .parse::<Ipv6Net>()
                .map_err(|_| ConfigError::InvalidCidr {
                    cidr: range_str.clone(),
                })?;
            matcher.add_ipv6_range(range);
        }

        for child_name in &group.groups {
            Self::expand_group(child_name, groups, matcher, processed)?;
        }

        Ok(())
    }

    pub fn scheme_allowed(&self, scheme: &str) -> bool {
        self.allowed_schemes.contains(scheme)
    }

    /// Check a normalized hostname against the blocked patterns
    pub fn is_blocked_host(&self, host: &str) -> bool {
        self.blocked.matches_host(host)
    }

    /// Check an address against the blocked ranges.
    ///
    /// IPv6 forms that embed an IPv4 address (mapped, compatible, NAT64) are
    /// also checked as the embedded IPv4 address.
    pub fn is_blocked_ip(&self, ip: IpAddr) -> bool {
        if self.blocked.matches_ip(ip) {
            return true;
        }

        match ip {
            IpAddr::V4(_) => false,
            IpAddr::V6(v6) => embedded_ipv4(v6)
                .map(|v4| self.blocked.matches_ip(IpAddr::V4(v4)))
                .unwrap_or(false),
        }
    }

    pub fn has_allow_list(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Check a host (and its address, when it is a literal) against the allow-list
    pub fn is_allowlisted(&self, host: &str, ip: Option<IpAddr>) -> bool {
        self.allowed.matches(host, ip)
    }

    pub fn is_blocked_port(&self, port: u16) -> bool {
        self.blocked_ports.contains(&port)
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        self.stream_idle_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn dns_timeout(&self) -> Duration {
        self.dns_timeout
    }
}

fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let segments = ip.segments();
    if segments[..6] == NAT64_PREFIX {
        let [a, b] = segments[6].to_be_bytes();
        let [c, d] = segments[7].to_be_bytes();
        return Some(Ipv4Addr::new(a, b, c, d));
    }
    // Covers both ::ffff:a.b.c.d and the deprecated ::a.b.c.d
    ip.to_ipv4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::ConfigLoader;

    fn builtin_policy() -> ProxyPolicy {
        let config = ConfigLoader::load_builtin().unwrap();
        ProxyPolicy::from_config(&config).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_builtin_blocks_internal_ranges() {
        let policy = builtin_policy();

        for addr in [
            "127.0.0.1",
            "127.8.9.10",
            "0.0.0.0",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "100.100.100.200",
            "224.0.0.1",
            "255.255.255.255",
            "::1",
            "::",
            "fe80::1",
            "fd00:ec2::254",
            "fc00::1",
        ] {
            assert!(policy.is_blocked_ip(ip(addr)), "{} should be blocked", addr);
        }

        for addr in ["8.8.8.8", "1.1.1.1", "172.32.0.1", "2606:4700::1111"] {
            assert!(!policy.is_blocked_ip(ip(addr)), "{} should pass", addr);
        }
    }

    #[test]
    fn test_embedded_ipv4_forms_are_checked() {
        let policy = builtin_policy();

        assert!(policy.is_blocked_ip(ip("::ffff:127.0.0.1")));
        assert!(policy.is_blocked_ip(ip("::ffff:169.254.169.254")));
        assert!(policy.is_blocked_ip(ip("::ffff:10.0.0.1")));
        assert!(policy.is_blocked_ip(ip("64:ff9b::a9fe:a9fe")));
        assert!(!policy.is_blocked_ip(ip("::ffff:8.8.8.8")));
        assert!(!policy.is_blocked_ip(ip("64:ff9b::808:808")));
    }

    #[test]
    fn test_builtin_blocks_local_names() {
        let policy = builtin_policy();

        assert!(policy.is_blocked_host("localhost"));
        assert!(policy.is_blocked_host("api.localhost"));
        assert!(policy.is_blocked_host("metadata.google.internal"));
        assert!(!policy.is_blocked_host("example.com"));
        assert!(!policy.has_allow_list());
    }

    #[test]
    fn test_listen_address_is_blocked() {
        let mut config = ConfigLoader::load_builtin().unwrap();
        config.server.listen = "203.0.114.7:3000".to_string();
        let policy = ProxyPolicy::from_config(&config).unwrap();

        assert!(policy.is_blocked_ip(ip("203.0.114.7")));
        assert!(!policy.is_blocked_ip(ip("203.0.114.8")));
    }

    #[test]
    fn test_unspecified_listen_needs_explicit_self_block() {
        let mut config = ConfigLoader::load_builtin().unwrap();
        config.server.listen = "0.0.0.0:3000".to_string();
        let policy = ProxyPolicy::from_config(&config).unwrap();
        assert!(!policy.is_blocked_ip(ip("203.0.114.7")));

        config.policy.blocked_networks.push("203.0.114.7/32".to_string());
        let policy = ProxyPolicy::from_config(&config).unwrap();
        assert!(policy.is_blocked_ip(ip("203.0.114.7")));
    }

    #[test]
    fn test_allow_list_and_inline_entries() {
        let mut config = ConfigLoader::load_builtin().unwrap();
        config.groups.insert(
            "partners".to_string(),
            HostGroup {
                hosts: vec!["*.partner.example".to_string()],
                ipv4_ranges: vec!["198.51.101.0/24".to_string()],
                ..Default::default()
            },
        );
        config.policy.allow_groups = vec!["partners".to_string()];
        config.policy.allowed_hosts = vec!["tools.example.com".to_string()];
        config.policy.blocked_hosts = vec!["*.evil.example".to_string()];
        config.policy.blocked_networks = vec!["203.0.114.0/24".to_string()];
        config.policy.blocked_ports = vec![6379];

        let policy = ProxyPolicy::from_config(&config).unwrap();
        assert!(policy.has_allow_list());
        assert!(policy.is_allowlisted("mcp.partner.example", None));
        assert!(policy.is_allowlisted("tools.example.com", None));
        assert!(policy.is_allowlisted("198.51.101.9", Some(ip("198.51.101.9"))));
        assert!(!policy.is_allowlisted("other.example", None));
        assert!(policy.is_blocked_host("x.evil.example"));
        assert!(policy.is_blocked_ip(ip("203.0.114.1")));
        assert!(policy.is_blocked_port(6379));
        assert!(!policy.is_blocked_port(443));
    }

    #[test]
    fn test_timeouts() {
        let mut config = ConfigLoader::load_builtin().unwrap();
        let policy = ProxyPolicy::from_config(&config).unwrap();
        assert_eq!(policy.request_timeout(), Duration::from_secs(30));
        assert_eq!(policy.stream_idle_timeout(), Duration::from_secs(30));
        assert_eq!(policy.dns_timeout(), Duration::from_millis(500));
        assert_eq!(policy.max_redirects(), 5);

        config.policy.stream_idle_timeout_ms = Some(120_000);
        let policy = ProxyPolicy::from_config(&config).unwrap();
        assert_eq!(policy.stream_idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_unknown_group_fails() {
        let mut config = ConfigLoader::load_builtin().unwrap();
        config.policy.deny_groups.push("nonexistent".to_string());

        assert!(matches!(
            ProxyPolicy::from_config(&config),
            Err(ProxyError::GroupNotFound { .. })
        ));
    }

    #[test]
    fn test_group_composition() {
        let mut config = Config::default();
        config.groups.insert(
            "base".to_string(),
            HostGroup {
                hosts: vec!["*.base.com".to_string()],
                ..Default::default()
            },
        );
        config.groups.insert(
            "internal".to_string(),
            HostGroup {
                hosts: vec!["*.extended.com".to_string()],
                groups: vec!["base".to_string()],
                ..Default::default()
            },
        );

        let policy = ProxyPolicy::from_config(&config).unwrap();

        assert!(policy.is_blocked_host("api.base.com"));
        assert!(policy.is_blocked_host("api.extended.com"));
        assert!(!policy.is_blocked_host("api.other.com"));
    }
}
