//! Upstream relay: sends a validated request, follows redirects under the
//! same policy, and classifies the result for the front end.

pub mod client;
pub mod headers;
pub mod stream;

pub use stream::RelayBody;

use crate::error::Result;
use bytes::Bytes;
use hyper::header::{HeaderMap, AUTHORIZATION, LOCATION};
use hyper::{Method, StatusCode};
use mcp_guard::{RouteMode, UriValidator, ValidatedTarget, ValidationError};
use tokio::time::Instant;
use tracing::{debug, warn};

/// The outbound half of one proxied call
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    /// Already reduced to the route's forwarded headers
    pub headers: HeaderMap,
    pub body: Bytes,
    pub mode: RouteMode,
}

/// How an upstream exchange ended
#[derive(Debug)]
pub enum RelayOutcome {
    /// Upstream produced a body; it is relayed as it arrives
    Streaming {
        status: StatusCode,
        headers: HeaderMap,
        body: RelayBody,
    },
    /// Upstream demands authentication; its challenge headers are kept
    Unauthorized { headers: HeaderMap },
    /// The relay gave up on the exchange after upstream answered
    UpstreamError { status: StatusCode, message: String },
    /// Upstream answered with a status that never carries a body
    NoBody { status: StatusCode },
    /// No response head arrived: connect failure, reset or deadline
    TransportFailure { message: String },
    /// A redirect pointed somewhere the policy does not allow
    RedirectRejected(ValidationError),
}

impl RelayOutcome {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            RelayOutcome::Streaming { .. } => "streaming",
            RelayOutcome::Unauthorized { .. } => "unauthorized",
            RelayOutcome::UpstreamError { .. } => "upstream_error",
            RelayOutcome::NoBody { .. } => "no_body",
            RelayOutcome::TransportFailure { .. } => "transport_failure",
            RelayOutcome::RedirectRejected(_) => "redirect_rejected",
        }
    }
}

pub struct Relay {
    validator: UriValidator,
    shared: reqwest::Client,
}

impl Relay {
    pub fn new(validator: UriValidator) -> Result<Self> {
        let shared = client::shared(validator.policy())?;
        Ok(Self { validator, shared })
    }

    /// Relay `request` to `target`, following redirects only to targets that
    /// pass validation, up to the policy's redirect limit. The request timeout
    /// bounds the whole chain, not each hop.
    pub async fn fetch(&self, target: ValidatedTarget, request: RelayRequest) -> RelayOutcome {
        let policy = self.validator.policy();
        let RelayRequest {
            mut method,
            mut headers,
            mut body,
            mode,
        } = request;
        let mut target = target;
        let mut hops = 0u32;
        let deadline = Instant::now() + policy.request_timeout();

        loop {
            let sent = match self.client_for(&target) {
                Ok(client) => {
                    client::send(
                        &client,
                        &target,
                        &method,
                        &headers,
                        &body,
                        mode,
                        policy,
                        deadline,
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    return RelayOutcome::TransportFailure {
                        message: e.to_string(),
                    }
                }
            };

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .map(|v| v.to_str().map(str::to_string));

            if is_redirect(status) && policy.max_redirects() > 0 {
                if let Some(location) = location {
                    hops += 1;
                    if hops > policy.max_redirects() {
                        warn!("Giving up after {} redirects from {}", hops - 1, target.url());
                        return RelayOutcome::UpstreamError {
                            status: StatusCode::BAD_GATEWAY,
                            message: "too many redirects".to_string(),
                        };
                    }

                    let next = match location.ok().and_then(|loc| target.url().join(&loc).ok()) {
                        Some(next) => next,
                        None => {
                            warn!("Unusable redirect Location from {}", target.url());
                            return RelayOutcome::UpstreamError {
                                status: StatusCode::BAD_GATEWAY,
                                message: "invalid redirect".to_string(),
                            };
                        }
                    };

                    let next = match self.validator.check_url(&next).await {
                        Ok(next) => next,
                        Err(e) => {
                            warn!(
                                "Rejected redirect from {} ({}): {}",
                                target.url(),
                                e.kind(),
                                e
                            );
                            return RelayOutcome::RedirectRejected(e);
                        }
                    };

                    let (next_method, keep_body) = redirect_method(status, &method);
                    if !keep_body {
                        body = Bytes::new();
                    }
                    method = next_method;
                    if next.url().origin() != target.url().origin() {
                        headers.remove(AUTHORIZATION);
                    }

                    debug!("Following {} redirect {} -> {}", status, target.url(), next.url());
                    target = next;
                    continue;
                }
            }

            let filtered = headers::filter_response(response.headers(), target.url(), &self.validator);

            if status == StatusCode::UNAUTHORIZED {
                return RelayOutcome::Unauthorized { headers: filtered };
            }

            if is_null_body(status) {
                return RelayOutcome::NoBody { status };
            }

            return RelayOutcome::Streaming {
                status,
                headers: filtered,
                body: RelayBody::from_response(response, policy.stream_idle_timeout()),
            };
        }
    }

    fn client_for(&self, target: &ValidatedTarget) -> Result<reqwest::Client> {
        if target.addrs().is_empty() {
            Ok(self.shared.clone())
        } else {
            client::pinned(target, self.validator.policy())
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn is_null_body(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED
    )
}

/// Method for the next hop and whether the body is replayed
fn redirect_method(status: StatusCode, method: &Method) -> (Method, bool) {
    match status {
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => (method.clone(), true),
        StatusCode::SEE_OTHER if *method != Method::HEAD => (Method::GET, false),
        _ if *method == Method::GET || *method == Method::HEAD => (method.clone(), false),
        _ => (Method::GET, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_method() {
        let cases = [
            (StatusCode::MOVED_PERMANENTLY, Method::POST, Method::GET, false),
            (StatusCode::FOUND, Method::POST, Method::GET, false),
            (StatusCode::FOUND, Method::GET, Method::GET, false),
            (StatusCode::SEE_OTHER, Method::POST, Method::GET, false),
            (StatusCode::SEE_OTHER, Method::HEAD, Method::HEAD, false),
            (StatusCode::TEMPORARY_REDIRECT, Method::POST, Method::POST, true),
            (StatusCode::PERMANENT_REDIRECT, Method::DELETE, Method::DELETE, true),
        ];

        for (status, method, expected, keep) in cases {
            assert_eq!(
                redirect_method(status, &method),
                (expected, keep),
                "{} {}",
                status,
                method
            );
        }
    }

    #[test]
    fn test_status_classes() {
        assert!(is_redirect(StatusCode::FOUND));
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
        assert!(is_null_body(StatusCode::NO_CONTENT));
        assert!(!is_null_body(StatusCode::OK));
    }
}
