//! Route table and per-route extraction of the caller's target URI

use crate::error::{RelayError, Result};
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Method;
use mcp_guard::{CandidateSource, RouteConfig, RouteMode};
use std::collections::HashMap;
use url::Url;

/// A configured route, parsed into the types the handler works with
#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub methods: Vec<Method>,
    pub mode: RouteMode,
    pub default_uri: Url,
    pub source: CandidateSource,
    pub forward_headers: Vec<HeaderName>,
    allow_headers: HeaderValue,
    allow: HeaderValue,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Result<Self> {
        let invalid = |reason: String| RelayError::Route {
            path: config.path.clone(),
            reason,
        };

        let default_uri = Url::parse(&config.default_uri)
            .map_err(|e| invalid(format!("default_uri: {}", e)))?;

        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.as_bytes()).map_err(|_| invalid(format!("method {}", m)))
            })
            .collect::<Result<Vec<_>>>()?;

        let forward_headers = config
            .forward_headers
            .iter()
            .map(|h| {
                HeaderName::from_bytes(h.as_bytes()).map_err(|_| invalid(format!("header {}", h)))
            })
            .collect::<Result<Vec<_>>>()?;

        if let CandidateSource::Header { name } = &config.source {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("source header {}", name)))?;
        }

        let mut allowed = vec!["Content-Type".to_string()];
        allowed.extend(forward_headers.iter().map(|h| h.as_str().to_string()));
        let allow_headers = HeaderValue::from_str(&allowed.join(", "))
            .map_err(|_| invalid("forward_headers".to_string()))?;

        let mut allow: Vec<&str> = methods.iter().map(Method::as_str).collect();
        allow.push("OPTIONS");
        let allow = HeaderValue::from_str(&allow.join(", "))
            .map_err(|_| invalid("methods".to_string()))?;

        Ok(Self {
            path: config.path.clone(),
            methods,
            mode: config.mode,
            default_uri,
            source: config.source.clone(),
            forward_headers,
            allow_headers,
            allow,
        })
    }

    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Value for `Access-Control-Allow-Headers`
    pub fn allow_headers(&self) -> &HeaderValue {
        &self.allow_headers
    }

    /// Value for `Allow` on 405 responses
    pub fn allow(&self) -> &HeaderValue {
        &self.allow
    }

    /// Pull the caller's candidate URI out of the request.
    ///
    /// For a JSON body source the field is removed and the remaining body is
    /// returned for forwarding; otherwise the body passes through untouched.
    pub fn extract_candidate(
        &self,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> std::result::Result<(Option<String>, Bytes), BodyError> {
        match &self.source {
            CandidateSource::Query { name } => {
                Ok((query_param(query, name).map(str::to_string), body))
            }
            CandidateSource::Header { name } => {
                let value = headers
                    .get(name.as_str())
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
                Ok((value, body))
            }
            CandidateSource::JsonBody { field } => take_json_field(body, field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    InvalidJson,
    FieldNotString(String),
}

/// Raw value of a query parameter. Decoding is left to the validator, which
/// decodes exactly once.
pub fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then_some(value)
    })
}

fn take_json_field(
    body: Bytes,
    field: &str,
) -> std::result::Result<(Option<String>, Bytes), BodyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok((None, body));
    }

    let mut value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| BodyError::InvalidJson)?;

    let Some(object) = value.as_object_mut() else {
        return Ok((None, body));
    };

    match object.shift_remove(field) {
        None => Ok((None, body)),
        Some(serde_json::Value::String(candidate)) => {
            let rest = serde_json::to_vec(&value).map_err(|_| BodyError::InvalidJson)?;
            Ok((Some(candidate), Bytes::from(rest)))
        }
        Some(serde_json::Value::Null) => {
            let rest = serde_json::to_vec(&value).map_err(|_| BodyError::InvalidJson)?;
            Ok((None, Bytes::from(rest)))
        }
        Some(_) => Err(BodyError::FieldNotString(field.to_string())),
    }
}

/// All configured routes, keyed by exact path
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let mut table = HashMap::new();
        for config in routes {
            let route = Route::from_config(config)?;
            if table.insert(route.path.clone(), route).is_some() {
                return Err(RelayError::Route {
                    path: config.path.clone(),
                    reason: "duplicate path".to_string(),
                });
            }
        }
        Ok(Self { routes: table })
    }

    pub fn get(&self, path: &str) -> Option<&Route> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_guard::ConfigLoader;

    fn route(source: CandidateSource) -> Route {
        Route::from_config(&RouteConfig {
            path: "/api/mcp/proxy".to_string(),
            methods: vec!["POST".to_string()],
            mode: RouteMode::Json,
            default_uri: "http://localhost:8080/mcp".to_string(),
            source,
            forward_headers: vec!["authorization".to_string(), "mcp-session-id".to_string()],
        })
        .unwrap()
    }

    #[test]
    fn test_builtin_routes_compile() {
        let config = ConfigLoader::load_builtin().unwrap();
        let table = RouteTable::from_config(&config.routes).unwrap();
        assert_eq!(table.len(), 3);

        let sse = table.get("/api/mcp/sse").unwrap();
        assert_eq!(sse.mode, RouteMode::EventStream);
        assert!(sse.accepts(&Method::GET));
        assert!(!sse.accepts(&Method::POST));
    }

    #[test]
    fn test_cors_and_allow_values() {
        let route = route(CandidateSource::default());
        assert_eq!(
            route.allow_headers(),
            "Content-Type, authorization, mcp-session-id"
        );
        assert_eq!(route.allow(), "POST, OPTIONS");
    }

    #[test]
    fn test_query_param() {
        let q = Some("a=1&server_uri=http%3A%2F%2Fexample.com&b");
        assert_eq!(query_param(q, "server_uri"), Some("http%3A%2F%2Fexample.com"));
        assert_eq!(query_param(q, "b"), Some(""));
        assert_eq!(query_param(q, "missing"), None);
        assert_eq!(query_param(None, "server_uri"), None);
    }

    #[test]
    fn test_extract_from_query() {
        let route = route(CandidateSource::default());
        let body = Bytes::from_static(b"{\"jsonrpc\":\"2.0\"}");
        let (candidate, rest) = route
            .extract_candidate(
                Some("server_uri=https://mcp.example.com/mcp"),
                &HeaderMap::new(),
                body.clone(),
            )
            .unwrap();
        assert_eq!(candidate.as_deref(), Some("https://mcp.example.com/mcp"));
        assert_eq!(rest, body);
    }

    #[test]
    fn test_extract_from_header() {
        let route = route(CandidateSource::Header {
            name: "x-mcp-server".to_string(),
        });
        let mut headers = HeaderMap::new();
        headers.insert("x-mcp-server", HeaderValue::from_static("https://mcp.example.com"));

        let (candidate, _) = route
            .extract_candidate(None, &headers, Bytes::new())
            .unwrap();
        assert_eq!(candidate.as_deref(), Some("https://mcp.example.com"));

        let (candidate, _) = route
            .extract_candidate(None, &HeaderMap::new(), Bytes::new())
            .unwrap();
        assert_eq!(candidate, None);
    }

    #[test]
    fn test_extract_from_json_body_removes_field() {
        let route = route(CandidateSource::JsonBody {
            field: "server_uri".to_string(),
        });
        let body = Bytes::from_static(
            b"{\"server_uri\":\"https://mcp.example.com/messages\",\"jsonrpc\":\"2.0\",\"id\":1}",
        );

        let (candidate, rest) = route
            .extract_candidate(None, &HeaderMap::new(), body)
            .unwrap();
        assert_eq!(candidate.as_deref(), Some("https://mcp.example.com/messages"));

        let rest: serde_json::Value = serde_json::from_slice(&rest).unwrap();
        assert_eq!(rest, serde_json::json!({"jsonrpc": "2.0", "id": 1}));
    }

    #[test]
    fn test_extract_from_json_body_edge_cases() {
        let route = route(CandidateSource::JsonBody {
            field: "server_uri".to_string(),
        });
        let headers = HeaderMap::new();

        let (candidate, rest) = route
            .extract_candidate(None, &headers, Bytes::new())
            .unwrap();
        assert_eq!(candidate, None);
        assert!(rest.is_empty());

        let batch = Bytes::from_static(b"[{\"jsonrpc\":\"2.0\"}]");
        let (candidate, rest) = route
            .extract_candidate(None, &headers, batch.clone())
            .unwrap();
        assert_eq!(candidate, None);
        assert_eq!(rest, batch);

        let err = route
            .extract_candidate(None, &headers, Bytes::from_static(b"{not json"))
            .unwrap_err();
        assert_eq!(err, BodyError::InvalidJson);

        let err = route
            .extract_candidate(None, &headers, Bytes::from_static(b"{\"server_uri\":42}"))
            .unwrap_err();
        assert_eq!(err, BodyError::FieldNotString("server_uri".to_string()));
    }

    #[test]
    fn test_json_body_keeps_field_order() {
        let route = route(CandidateSource::JsonBody {
            field: "server_uri".to_string(),
        });
        let body = Bytes::from_static(
            b"{\"method\":\"tools/call\",\"server_uri\":\"https://mcp.example.com\",\"jsonrpc\":\"2.0\",\"id\":7}",
        );

        let (_, rest) = route
            .extract_candidate(None, &HeaderMap::new(), body)
            .unwrap();
        assert_eq!(
            rest,
            Bytes::from_static(b"{\"method\":\"tools/call\",\"jsonrpc\":\"2.0\",\"id\":7}")
        );
    }

    #[test]
    fn test_invalid_source_header_rejected() {
        let result = Route::from_config(&RouteConfig {
            path: "/api/mcp/proxy".to_string(),
            methods: vec!["POST".to_string()],
            mode: RouteMode::Json,
            default_uri: "http://localhost:8080/mcp".to_string(),
            source: CandidateSource::Header {
                name: "x mcp server".to_string(),
            },
            forward_headers: vec![],
        });
        assert!(matches!(result, Err(RelayError::Route { .. })));
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let config = ConfigLoader::load_builtin().unwrap();
        let mut routes = config.routes.clone();
        routes.push(routes[0].clone());
        assert!(RouteTable::from_config(&routes).is_err());
    }
}
