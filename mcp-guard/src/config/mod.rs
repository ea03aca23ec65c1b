//! Configuration management for the relay

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{
    CandidateSource, Config, HostGroup, PolicyConfig, RouteConfig, RouteMode, ServerConfig,
};
pub use validator::ConfigValidator;
