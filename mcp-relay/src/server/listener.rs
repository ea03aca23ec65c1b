use super::handler::RelayService;
use crate::error::{RelayError, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// HTTP front end bound to a TCP address
pub struct ProxyServer {
    listener: TcpListener,
    service: Arc<RelayService>,
}

impl ProxyServer {
    /// Bind the listening socket; connections are accepted by [`serve`](Self::serve)
    pub async fn bind(addr: SocketAddr, service: Arc<RelayService>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self) -> Result<()> {
        info!("MCP relay listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let service = self.service.clone();

            tokio::spawn(async move {
                debug!("Connection from {}", peer);
                let io = TokioIo::new(stream);
                let svc = service_fn(move |request: Request<Incoming>| {
                    let service = service.clone();
                    async move { Ok::<_, Infallible>(service.handle(request).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                    debug!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }
}
