//! Response construction for the front end

use super::routes::Route;
use crate::relay::RelayOutcome;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ALLOW, CACHE_CONTROL, CONNECTION,
    CONTENT_TYPE,
};
use hyper::{Response, StatusCode};
use mcp_guard::{RouteMode, ValidationError};
use serde_json::json;
use std::io;
use tracing::error;

pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

const JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn with_parts(status: StatusCode, headers: HeaderMap, body: ProxyBody) -> Response<ProxyBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn apply_cors(headers: &mut HeaderMap, route: Option<&Route>) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    let allow_headers = match route {
        Some(route) => route.allow_headers().clone(),
        None => HeaderValue::from_static("Content-Type"),
    };
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("*"));
}

fn json_response(
    status: StatusCode,
    value: serde_json::Value,
    route: Option<&Route>,
) -> Response<ProxyBody> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    apply_cors(&mut headers, route);
    with_parts(status, headers, full(value.to_string()))
}

pub fn health() -> Response<ProxyBody> {
    json_response(StatusCode::OK, json!({"status": "ok"}), None)
}

pub fn not_found() -> Response<ProxyBody> {
    json_response(StatusCode::NOT_FOUND, json!({"error": "Not found"}), None)
}

pub fn method_not_allowed(route: &Route) -> Response<ProxyBody> {
    let mut response = json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        json!({"error": "Method not allowed"}),
        Some(route),
    );
    response.headers_mut().insert(ALLOW, route.allow().clone());
    response
}

pub fn preflight(route: &Route) -> Response<ProxyBody> {
    let mut headers = HeaderMap::new();
    apply_cors(&mut headers, Some(route));
    with_parts(StatusCode::NO_CONTENT, headers, empty())
}

pub fn payload_too_large(route: &Route) -> Response<ProxyBody> {
    json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        json!({"error": "Request body too large"}),
        Some(route),
    )
}

pub fn bad_request(route: &Route, message: &str) -> Response<ProxyBody> {
    json_response(StatusCode::BAD_REQUEST, json!({"error": message}), Some(route))
}

/// Rejection of a caller-supplied or redirect target. Only malformed input
/// gets a detail; policy reasons are not disclosed.
pub fn invalid_target(route: &Route, err: &ValidationError) -> Response<ProxyBody> {
    let body = match err.public_detail() {
        Some(detail) => json!({"error": "Invalid server URI", "detail": detail}),
        None => json!({"error": "Invalid server URI"}),
    };
    json_response(StatusCode::BAD_REQUEST, body, Some(route))
}

/// Content type presented to the caller for a streamed upstream body
fn relay_content_type(mode: RouteMode, upstream: &HeaderMap) -> HeaderValue {
    match mode {
        RouteMode::EventStream => HeaderValue::from_static(EVENT_STREAM),
        RouteMode::Json => {
            let passthrough = upstream
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(';').next())
                .map(|v| v.trim().to_ascii_lowercase())
                .is_some_and(|v| v == JSON || v == EVENT_STREAM);
            match upstream.get(CONTENT_TYPE) {
                Some(value) if passthrough => value.clone(),
                _ => HeaderValue::from_static(JSON),
            }
        }
    }
}

pub fn from_outcome(route: &Route, outcome: RelayOutcome) -> Response<ProxyBody> {
    match outcome {
        RelayOutcome::Streaming {
            status,
            mut headers,
            body,
        } => {
            let content_type = relay_content_type(route.mode, &headers);
            headers.insert(CONTENT_TYPE, content_type);
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            apply_cors(&mut headers, Some(route));

            let frames = body.into_stream().map_ok(Frame::data);
            with_parts(status, headers, StreamBody::new(frames).boxed_unsync())
        }
        RelayOutcome::Unauthorized { mut headers } => {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            apply_cors(&mut headers, Some(route));
            with_parts(StatusCode::UNAUTHORIZED, headers, empty())
        }
        RelayOutcome::UpstreamError { status, message } => {
            json_response(status, json!({"error": message}), Some(route))
        }
        RelayOutcome::NoBody { status } => {
            error!("Upstream for {} answered {} with no body", route.path, status);
            json_response(
                StatusCode::BAD_GATEWAY,
                json!({"error": "No response body from MCP server"}),
                Some(route),
            )
        }
        RelayOutcome::TransportFailure { message } => {
            error!("Relay for {} failed: {}", route.path, message);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "Failed to connect to MCP server"}),
                Some(route),
            )
        }
        RelayOutcome::RedirectRejected(err) => invalid_target(route, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_content_type() {
        let mut upstream = HeaderMap::new();
        assert_eq!(relay_content_type(RouteMode::Json, &upstream), JSON);
        assert_eq!(
            relay_content_type(RouteMode::EventStream, &upstream),
            EVENT_STREAM
        );

        upstream.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert_eq!(
            relay_content_type(RouteMode::Json, &upstream),
            "text/event-stream; charset=utf-8"
        );

        upstream.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        assert_eq!(relay_content_type(RouteMode::Json, &upstream), JSON);
    }
}
