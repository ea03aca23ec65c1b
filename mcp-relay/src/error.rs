//! Error types for relay and server operations

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid route {path}: {reason}")]
    Route { path: String, reason: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
