//! Header selection for outbound requests and filtering of upstream responses

use hyper::header::{HeaderMap, HeaderName, CONNECTION, CONTENT_LENGTH, LOCATION, SET_COOKIE};
use mcp_guard::UriValidator;
use tracing::debug;
use url::Url;

/// Hop-by-hop headers; they describe one connection and never cross the relay
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Copy only the allow-listed inbound headers. Values are forwarded verbatim.
pub fn forwardable(inbound: &HeaderMap, allowed: &[HeaderName]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in allowed {
        for value in inbound.get_all(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Filter upstream response headers before they reach the caller.
///
/// Drops hop-by-hop headers (including any named in `Connection`) and
/// `Content-Length`, since the body is re-framed. A `Location` that does not
/// resolve or that points at a blocked host is dropped, as is a `Set-Cookie`
/// scoped to a blocked domain.
pub fn filter_response(upstream: &HeaderMap, base: &Url, validator: &UriValidator) -> HeaderMap {
    let connection_listed: Vec<String> = upstream
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut out = HeaderMap::new();
    for (name, value) in upstream {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower)
            || connection_listed.iter().any(|t| t == lower)
            || *name == CONTENT_LENGTH
        {
            continue;
        }

        if *name == LOCATION {
            let keep = value
                .to_str()
                .ok()
                .and_then(|loc| base.join(loc).ok())
                .is_some_and(|target| match target.host_str() {
                    Some(host) => !validator.is_literal_blocked(host),
                    None => false,
                });
            if !keep {
                debug!("dropping upstream Location header pointing at a blocked target");
                continue;
            }
        }

        if *name == SET_COOKIE {
            if let Some(domain) = value.to_str().ok().and_then(cookie_domain) {
                if validator.is_literal_blocked(domain) {
                    debug!("dropping upstream Set-Cookie scoped to a blocked domain");
                    continue;
                }
            }
        }

        out.append(name.clone(), value.clone());
    }
    out
}

/// Extract the `Domain` attribute of a `Set-Cookie` value
fn cookie_domain(cookie: &str) -> Option<&str> {
    cookie.split(';').skip(1).find_map(|attr| {
        let (key, value) = attr.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("domain")
            .then(|| value.trim().trim_start_matches('.'))
    })
}
