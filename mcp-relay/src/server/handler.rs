//! Per-request handling: routing, target validation and relaying

use super::response::{self, ProxyBody};
use super::routes::RouteTable;
use crate::relay::{headers, Relay, RelayRequest};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Method, Request, Response};
use mcp_guard::{TargetSpec, UriValidator};
use tracing::{debug, info, warn};

/// Everything a request needs, shared read-only across connections
pub struct RelayService {
    validator: UriValidator,
    relay: Relay,
    routes: RouteTable,
    max_body_bytes: usize,
}

impl RelayService {
    pub fn new(
        validator: UriValidator,
        relay: Relay,
        routes: RouteTable,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            validator,
            relay,
            routes,
            max_body_bytes,
        }
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let path = request.uri().path();

        if path == "/healthz" && request.method() == Method::GET {
            return response::health();
        }

        let Some(route) = self.routes.get(path) else {
            return response::not_found();
        };

        if request.method() == Method::OPTIONS {
            return response::preflight(route);
        }

        if !route.accepts(request.method()) {
            return response::method_not_allowed(route);
        }

        let (parts, body) = request.into_parts();
        let body = match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                warn!("Request body for {} over {} bytes", route.path, self.max_body_bytes);
                return response::payload_too_large(route);
            }
            Err(e) => {
                debug!("Failed to read request body for {}: {}", route.path, e);
                return response::bad_request(route, "Failed to read request body");
            }
        };

        let (candidate, body) =
            match route.extract_candidate(parts.uri.query(), &parts.headers, body) {
                Ok(extracted) => extracted,
                Err(e) => {
                    debug!("Unusable request body for {}: {:?}", route.path, e);
                    return response::bad_request(route, "Invalid request body");
                }
            };

        let spec = TargetSpec::new(candidate, route.default_uri.clone());
        let target = match self.validator.validate(&spec).await {
            Ok(target) => target,
            Err(e) => {
                warn!("Rejected target for {} ({}): {}", route.path, e.kind(), e);
                return response::invalid_target(route, &e);
            }
        };

        if target.is_trusted() {
            debug!("Relaying {} to route default", route.path);
        } else {
            info!("Relaying {} to {}", route.path, target.url());
        }

        let outbound = RelayRequest {
            method: parts.method,
            headers: headers::forwardable(&parts.headers, &route.forward_headers),
            body,
            mode: route.mode,
        };

        let outcome = self.relay.fetch(target, outbound).await;
        debug!("Relay for {} finished as {}", route.path, outcome.kind());
        response::from_outcome(route, outcome)
    }
}
