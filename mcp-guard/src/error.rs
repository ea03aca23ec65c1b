//! Error types for configuration and URI validation

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration validation error: {0}")]
    Config(#[from] ConfigError),

    #[error("Group not found: {group}")]
    GroupNotFound { group: String },

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid environment override {key}: {reason}")]
    EnvOverride { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cycle detected in group references: {path}")]
    CycleDetected { path: String },

    #[error("Unknown group reference: {group}")]
    UnknownGroup { group: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid wildcard pattern: {pattern}")]
    InvalidPattern { pattern: String },

    #[error("Invalid listen address: {addr}")]
    InvalidListen { addr: String },

    #[error("Invalid scheme: {scheme}")]
    InvalidScheme { scheme: String },

    #[error("Invalid route {path}: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("Duplicate route path: {path}")]
    DuplicateRoute { path: String },
}

/// Why a target URI was refused.
///
/// The `Display` strings are for logs. What reaches a caller is decided by
/// [`ValidationError::public_detail`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed URI: {0}")]
    MalformedUri(String),

    #[error("scheme not allowed: {scheme}")]
    SchemeNotAllowed { scheme: String },

    #[error("blocked host: {host}")]
    BlockedHost { host: String },

    #[error("host not in allow-list: {host}")]
    HostNotAllowlisted { host: String },

    #[error("port not allowed: {port}")]
    PortNotAllowed { port: u16 },
}

impl ValidationError {
    /// Detail that may be shown to the caller. Only parse failures carry
    /// one; policy rejections never disclose what matched.
    pub fn public_detail(&self) -> Option<&str> {
        match self {
            ValidationError::MalformedUri(detail) => Some(detail),
            _ => None,
        }
    }

    /// Short machine-readable name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::MalformedUri(_) => "malformed_uri",
            ValidationError::SchemeNotAllowed { .. } => "scheme_not_allowed",
            ValidationError::BlockedHost { .. } => "blocked_host",
            ValidationError::HostNotAllowlisted { .. } => "host_not_allowlisted",
            ValidationError::PortNotAllowed { .. } => "port_not_allowed",
        }
    }
}
