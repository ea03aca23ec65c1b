//! Network filtering logic

pub mod matcher;
pub mod policy;

pub use matcher::HostMatcher;
pub use policy::ProxyPolicy;
