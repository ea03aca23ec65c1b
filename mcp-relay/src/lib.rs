//! Streaming HTTP/SSE relay for MCP tool servers

pub mod error;
pub mod relay;
pub mod server;

pub use error::{RelayError, Result};
pub use relay::{Relay, RelayBody, RelayOutcome, RelayRequest};
pub use server::{ProxyServer, RelayService, RouteTable};
