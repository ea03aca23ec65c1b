//! Configuration schema types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complete relay configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Named host groups referenced by the policy
    #[serde(default)]
    pub groups: HashMap<String, HostGroup>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upper bound on a buffered inbound request body
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_request_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

/// Outbound request policy.
///
/// Hosts and networks come from two places: the named `groups` referenced by
/// `deny_groups`/`allow_groups`, and the inline `blocked_*`/`allowed_hosts`
/// lists (environment overrides land in the inline lists).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
    /// Groups whose hosts and ranges must never be dialed
    #[serde(default = "default_deny_groups")]
    pub deny_groups: Vec<String>,
    /// Groups forming the allow-list. Empty means any non-blocked host passes.
    #[serde(default)]
    pub allow_groups: Vec<String>,
    #[serde(default)]
    pub blocked_hosts: Vec<String>,
    #[serde(default)]
    pub blocked_networks: Vec<String>,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub blocked_ports: Vec<u16>,
    /// Redirect hops the relay will follow. Zero hands 3xx back to the caller.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Longest wait for the next body chunk; defaults to `request_timeout_ms`
    #[serde(default)]
    pub stream_idle_timeout_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_deny_groups() -> Vec<String> {
    vec!["internal".to_string()]
}

fn default_max_redirects() -> u32 {
    5
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_dns_timeout_ms() -> u64 {
    500
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: default_allowed_schemes(),
            deny_groups: default_deny_groups(),
            allow_groups: Vec::new(),
            blocked_hosts: Vec::new(),
            blocked_networks: Vec::new(),
            allowed_hosts: Vec::new(),
            blocked_ports: Vec::new(),
            max_redirects: default_max_redirects(),
            request_timeout_ms: default_request_timeout_ms(),
            stream_idle_timeout_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            dns_timeout_ms: default_dns_timeout_ms(),
        }
    }
}

/// A named group of hosts and IP ranges
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostGroup {
    #[serde(default)]
    pub description: String,
    /// Wildcard hostname patterns
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub ipv4_ranges: Vec<String>,
    #[serde(default)]
    pub ipv6_ranges: Vec<String>,
    /// References to other groups (for composition)
    #[serde(default)]
    pub groups: Vec<String>,
}

/// How a route's upstream response is presented to the caller
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// JSON-RPC request/response; upstream may still answer with an event stream
    #[default]
    Json,
    /// Long-lived server-sent event stream
    EventStream,
}

/// Where a route finds the caller's target URI
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateSource {
    Query { name: String },
    JsonBody { field: String },
    Header { name: String },
}

impl Default for CandidateSource {
    fn default() -> Self {
        CandidateSource::Query {
            name: "server_uri".to_string(),
        }
    }
}

/// One proxy endpoint: a path bound to a default target and forwarding rules
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub mode: RouteMode,
    /// Operator-configured target used when the caller supplies none
    pub default_uri: String,
    #[serde(default)]
    pub source: CandidateSource,
    /// Inbound header names relayed upstream; nothing else is forwarded
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,
}

fn default_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

fn default_forward_headers() -> Vec<String> {
    vec!["authorization".to_string()]
}
