//! HTTP front end exposing the configured relay routes

pub mod handler;
pub mod listener;
pub mod response;
pub mod routes;


pub use handler::RelayService;
pub use listener::ProxyServer;
pub use response::ProxyBody;
pub use routes::{Route, RouteTable};
