//! Outbound HTTP client construction and single-hop sends

use crate::error::{RelayError, Result};
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::Method;
use mcp_guard::{ProxyPolicy, RouteMode, ValidatedTarget};
use reqwest::redirect;
use tokio::time::Instant;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("mcp-relay/", env!("CARGO_PKG_VERSION"));

fn builder(policy: &ProxyPolicy) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .no_proxy()
        .connect_timeout(policy.connect_timeout())
        .user_agent(USER_AGENT)
}

/// Client for targets that need no pinning: IP literals and trusted defaults
pub fn shared(policy: &ProxyPolicy) -> Result<reqwest::Client> {
    builder(policy).build().map_err(RelayError::ClientBuild)
}

/// Client that can only dial the addresses the target was validated against
pub fn pinned(target: &ValidatedTarget, policy: &ProxyPolicy) -> Result<reqwest::Client> {
    let mut builder = builder(policy);
    if let Some(host) = target.url().host_str() {
        builder = builder.resolve_to_addrs(host, target.addrs());
    }
    builder.build().map_err(RelayError::ClientBuild)
}

/// What the upstream should return for a route
pub fn accept_for(mode: RouteMode) -> HeaderValue {
    match mode {
        RouteMode::Json => HeaderValue::from_static("application/json, text/event-stream"),
        RouteMode::EventStream => HeaderValue::from_static("text/event-stream"),
    }
}

/// Send one request and wait for the response head.
///
/// `deadline` is shared by every hop of a redirect chain. It covers
/// connecting and receiving headers only; the body is streamed afterwards
/// under the idle timeout.
#[allow(clippy::too_many_arguments)]
pub async fn send(
    client: &reqwest::Client,
    target: &ValidatedTarget,
    method: &Method,
    headers: &HeaderMap,
    body: &Bytes,
    mode: RouteMode,
    policy: &ProxyPolicy,
    deadline: Instant,
) -> Result<reqwest::Response> {
    let mut request = client
        .request(method.clone(), target.url().clone())
        .headers(headers.clone())
        .header(ACCEPT, accept_for(mode));

    if !body.is_empty() {
        if mode == RouteMode::Json && !headers.contains_key(CONTENT_TYPE) {
            request = request.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        request = request.body(body.clone());
    }

    debug!("Relaying {} to {}", method, target.url());

    match tokio::time::timeout_at(deadline, request.send()).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            warn!("Upstream request to {} failed: {}", target.url(), e);
            Err(RelayError::Request(e))
        }
        Err(_) => {
            let limit = policy.request_timeout();
            warn!("Upstream {} did not respond within {:?}", target.url(), limit);
            Err(RelayError::Timeout(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_for_mode() {
        assert_eq!(
            accept_for(RouteMode::Json),
            "application/json, text/event-stream"
        );
        assert_eq!(accept_for(RouteMode::EventStream), "text/event-stream");
    }
}
