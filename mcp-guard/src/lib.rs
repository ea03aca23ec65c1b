//! SSRF policy and target validation for the MCP relay

pub mod config;
pub mod error;
pub mod filter;
pub mod uri;

// Re-export commonly used types
pub use config::{CandidateSource, Config, ConfigLoader, RouteConfig, RouteMode};
pub use error::{ConfigError, ProxyError, Result, ValidationError};
pub use filter::{HostMatcher, ProxyPolicy};
pub use uri::{Resolve, TargetSpec, UriValidator, ValidatedTarget, ValidationResult};
