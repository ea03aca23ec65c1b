//! Configuration validation including cycle detection

use super::schema::{CandidateSource, Config, HostGroup, RouteConfig};
use crate::error::{ConfigError, Result};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate entire configuration
    pub fn validate(config: &Config) -> Result<()> {
        Self::check_cycles(&config.groups)?;
        Self::validate_references(config)?;
        Self::validate_patterns(config)?;
        Self::validate_ranges(config)?;
        Self::validate_server(config)?;
        Self::validate_schemes(config)?;
        Self::validate_routes(&config.routes)?;
        Ok(())
    }

    /// Check for cycles in group references using DFS
    fn check_cycles(groups: &HashMap<String, HostGroup>) -> Result<()> {
        for group_name in groups.keys() {
            let mut visited = HashSet::new();
            let mut path = Vec::new();
            Self::dfs_cycle_check(group_name, groups, &mut visited, &mut path)?;
        }
        Ok(())
    }

    /// DFS-based cycle detection
    fn dfs_cycle_check(
        group_name: &str,
        groups: &HashMap<String, HostGroup>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        // If this group is in the current path, we found a cycle
        if path.iter().any(|p| p == group_name) {
            path.push(group_name.to_string());
            return Err(ConfigError::CycleDetected {
                path: path.join(" -> "),
            }
            .into());
        }

        if visited.contains(group_name) {
            return Ok(());
        }

        visited.insert(group_name.to_string());
        path.push(group_name.to_string());

        if let Some(group) = groups.get(group_name) {
            for child in &group.groups {
                Self::dfs_cycle_check(child, groups, visited, path)?;
            }
        }

        path.pop();
        Ok(())
    }

    /// Validate that all group references exist
    fn validate_references(config: &Config) -> Result<()> {
        for (group_name, group) in &config.groups {
            for ref_name in &group.groups {
                if !config.groups.contains_key(ref_name) {
                    return Err(ConfigError::UnknownGroup {
                        group: format!("{} -> {}", group_name, ref_name),
                    }
                    .into());
                }
            }
        }

        let policy = &config.policy;
        for ref_name in policy.deny_groups.iter().chain(&policy.allow_groups) {
            if !config.groups.contains_key(ref_name) {
                return Err(ConfigError::UnknownGroup {
                    group: format!("policy -> {}", ref_name),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Validate wildcard patterns
    fn validate_patterns(config: &Config) -> Result<()> {
        let grouped = config
            .groups
            .iter()
            .flat_map(|(name, g)| g.hosts.iter().map(move |h| (name.as_str(), h)));
        let inline = config
            .policy
            .blocked_hosts
            .iter()
            .chain(&config.policy.allowed_hosts)
            .map(|h| ("policy", h));

        for (owner, pattern) in grouped.chain(inline) {
            // Basic validation: no double wildcards, no empty patterns
            if pattern.is_empty() || pattern.contains("**") {
                return Err(ConfigError::InvalidPattern {
                    pattern: format!("{} in {}", pattern, owner),
                }
                .into());
            }

            if pattern
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || c == '/')
            {
                return Err(ConfigError::InvalidPattern {
                    pattern: format!("{} in {}", pattern, owner),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Validate that every CIDR parses for its declared family
    fn validate_ranges(config: &Config) -> Result<()> {
        for group in config.groups.values() {
            for range in &group.ipv4_ranges {
                range
                    .parse::<Ipv4Net>()
                    .map_err(|_| ConfigError::InvalidCidr { cidr: range.clone() })?;
            }
            for range in &group.ipv6_ranges {
                range
                    .parse::<Ipv6Net>()
                    .map_err(|_| ConfigError::InvalidCidr { cidr: range.clone() })?;
            }
        }

        for range in &config.policy.blocked_networks {
            range
                .parse::<IpNet>()
                .map_err(|_| ConfigError::InvalidCidr { cidr: range.clone() })?;
        }

        Ok(())
    }

    fn validate_server(config: &Config) -> Result<()> {
        config
            .server
            .listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidListen {
                addr: config.server.listen.clone(),
            })?;
        Ok(())
    }

    fn validate_schemes(config: &Config) -> Result<()> {
        if config.policy.allowed_schemes.is_empty() {
            return Err(ConfigError::InvalidScheme {
                scheme: "<none>".to_string(),
            }
            .into());
        }

        for scheme in &config.policy.allowed_schemes {
            let valid = scheme
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+-.".contains(c));
            if !valid {
                return Err(ConfigError::InvalidScheme {
                    scheme: scheme.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    fn validate_routes(routes: &[RouteConfig]) -> Result<()> {
        let mut seen = HashSet::new();

        for route in routes {
            let invalid = |reason: String| ConfigError::InvalidRoute {
                path: route.path.clone(),
                reason,
            };

            if !route.path.starts_with('/') {
                return Err(invalid("path must start with '/'".to_string()).into());
            }
            if route.path == "/healthz" {
                return Err(invalid("path is reserved".to_string()).into());
            }
            if !seen.insert(route.path.as_str()) {
                return Err(ConfigError::DuplicateRoute {
                    path: route.path.clone(),
                }
                .into());
            }

            let default = Url::parse(&route.default_uri)
                .map_err(|e| invalid(format!("default_uri: {}", e)))?;
            if default.host_str().is_none() {
                return Err(invalid("default_uri has no host".to_string()).into());
            }

            if route.methods.is_empty() {
                return Err(invalid("no methods".to_string()).into());
            }
            for method in &route.methods {
                if method.is_empty() || !method.chars().all(|c| c.is_ascii_uppercase()) {
                    return Err(invalid(format!("invalid method {}", method)).into());
                }
            }

            for header in &route.forward_headers {
                if !is_header_token(header) {
                    return Err(invalid(format!("invalid header name {}", header)).into());
                }
            }

            if let CandidateSource::Header { name } = &route.source {
                if !is_header_token(name) {
                    return Err(invalid(format!("invalid source header {}", name)).into());
                }
            }
        }

        Ok(())
    }
}

/// RFC 7230 `token` characters
fn is_header_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteMode;
    use crate::error::ProxyError;

    fn group(children: &[&str]) -> HostGroup {
        HostGroup {
            groups: children.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn route(path: &str, default_uri: &str) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            methods: vec!["POST".to_string()],
            mode: RouteMode::Json,
            default_uri: default_uri.to_string(),
            source: CandidateSource::default(),
            forward_headers: vec!["authorization".to_string()],
        }
    }

    fn minimal_config() -> Config {
        let mut config = Config::default();
        config.groups.insert("internal".to_string(), HostGroup::default());
        config
    }

    #[test]
    fn test_no_cycle() {
        let mut groups = HashMap::new();
        groups.insert("a".to_string(), group(&["b"]));
        groups.insert("b".to_string(), group(&[]));

        assert!(ConfigValidator::check_cycles(&groups).is_ok());
    }

    #[test]
    fn test_detect_cycle() {
        let mut groups = HashMap::new();
        groups.insert("a".to_string(), group(&["b"]));
        groups.insert("b".to_string(), group(&["a"])); // Cycle!

        let err = ConfigValidator::check_cycles(&groups).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Config(ConfigError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_unknown_policy_group() {
        let mut config = minimal_config();
        config.policy.allow_groups.push("partners".to_string());

        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Config(ConfigError::UnknownGroup { group }) if group == "policy -> partners"
        ));
    }

    #[test]
    fn test_invalid_cidr() {
        let mut config = minimal_config();
        config.groups.insert(
            "bad".to_string(),
            HostGroup {
                ipv4_ranges: vec!["10.0.0.0/33".to_string()],
                ..Default::default()
            },
        );

        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ProxyError::Config(ConfigError::InvalidCidr { .. }))
        ));
    }

    #[test]
    fn test_ipv6_range_in_ipv4_list_rejected() {
        let mut config = minimal_config();
        config.policy.blocked_networks.push("fd00::/8".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());

        config.groups.insert(
            "mixed".to_string(),
            HostGroup {
                ipv4_ranges: vec!["fd00::/8".to_string()],
                ..Default::default()
            },
        );
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        let mut config = minimal_config();
        config.policy.blocked_hosts.push("**.example.com".to_string());

        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ProxyError::Config(ConfigError::InvalidPattern { .. }))
        ));
    }

    #[test]
    fn test_route_validation() {
        let mut config = minimal_config();
        config.routes.push(route("/mcp", "http://localhost:8080/mcp"));
        assert!(ConfigValidator::validate(&config).is_ok());

        config.routes.push(route("/mcp", "http://localhost:8080/other"));
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ProxyError::Config(ConfigError::DuplicateRoute { .. }))
        ));

        config.routes.pop();
        config.routes.push(route("relative", "http://localhost:8080/mcp"));
        assert!(ConfigValidator::validate(&config).is_err());

        config.routes.pop();
        config.routes.push(route("/bad-default", "not a url"));
        assert!(ConfigValidator::validate(&config).is_err());

        config.routes.pop();
        let mut bad_header = route("/bad-header", "http://localhost:8080/mcp");
        bad_header.forward_headers.push("x bad".to_string());
        config.routes.push(bad_header);
        assert!(ConfigValidator::validate(&config).is_err());

        config.routes.pop();
        let mut bad_source = route("/bad-source", "http://localhost:8080/mcp");
        bad_source.source = CandidateSource::Header {
            name: "x mcp server".to_string(),
        };
        config.routes.push(bad_source);
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ProxyError::Config(ConfigError::InvalidRoute { .. }))
        ));
    }

    #[test]
    fn test_invalid_listen_and_scheme() {
        let mut config = minimal_config();
        config.server.listen = "localhost".to_string();
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ProxyError::Config(ConfigError::InvalidListen { .. }))
        ));

        let mut config = minimal_config();
        config.policy.allowed_schemes = vec!["HTTP".to_string()];
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ProxyError::Config(ConfigError::InvalidScheme { .. }))
        ));
    }
}
