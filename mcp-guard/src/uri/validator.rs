//! Target URI validation against the outbound policy

use super::resolver::{Resolve, SystemResolver};
use crate::error::ValidationError;
use crate::filter::ProxyPolicy;
use percent_encoding::percent_decode_str;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

pub type ValidationResult = std::result::Result<ValidatedTarget, ValidationError>;

/// The raw target for one request: what the caller supplied, if anything,
/// and the route's operator-configured fallback.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub candidate: Option<String>,
    pub default: Url,
}

impl TargetSpec {
    pub fn new(candidate: Option<String>, default: Url) -> Self {
        Self { candidate, default }
    }
}

/// A URL that passed validation, together with the addresses it was checked
/// against. An empty address list means the host is an IP literal or the
/// target is the trusted route default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTarget {
    url: Url,
    addrs: Vec<SocketAddr>,
    trusted: bool,
}

impl ValidatedTarget {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Addresses the connection must be pinned to
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// True for the route default, which bypasses caller-input checks
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }
}

/// Validates caller-supplied target URIs. Cheap to clone; holds no mutable
/// state, so one instance serves all requests concurrently.
#[derive(Clone)]
pub struct UriValidator {
    policy: Arc<ProxyPolicy>,
    resolver: Arc<dyn Resolve>,
}

impl UriValidator {
    pub fn new(policy: Arc<ProxyPolicy>) -> Self {
        Self::with_resolver(policy, Arc::new(SystemResolver))
    }

    pub fn with_resolver(policy: Arc<ProxyPolicy>, resolver: Arc<dyn Resolve>) -> Self {
        Self { policy, resolver }
    }

    pub fn policy(&self) -> &ProxyPolicy {
        &self.policy
    }

    /// Validate a request target. Without a caller candidate the route
    /// default is returned unmodified.
    pub async fn validate(&self, target: &TargetSpec) -> ValidationResult {
        let candidate = target
            .candidate
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        match candidate {
            None => Ok(ValidatedTarget {
                url: target.default.clone(),
                addrs: Vec::new(),
                trusted: true,
            }),
            Some(raw) => self.validate_candidate(raw).await,
        }
    }

    /// Decode, parse and check a caller-supplied URI string
    pub async fn validate_candidate(&self, raw: &str) -> ValidationResult {
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| ValidationError::MalformedUri("invalid percent-encoding".to_string()))?;

        let url = Url::parse(&decoded).map_err(|e| ValidationError::MalformedUri(e.to_string()))?;

        self.check_url(&url).await
    }

    /// Check an absolute URL against the policy. Used directly for redirect
    /// targets, which are already parsed.
    pub async fn check_url(&self, url: &Url) -> ValidationResult {
        if !self.policy.scheme_allowed(url.scheme()) {
            return Err(ValidationError::SchemeNotAllowed {
                scheme: url.scheme().to_string(),
            });
        }

        let host = url
            .host()
            .ok_or_else(|| ValidationError::MalformedUri("missing host".to_string()))?;

        self.check_port(url)?;

        let addrs = match host {
            Host::Ipv4(v4) => {
                self.check_literal(IpAddr::V4(v4))?;
                Vec::new()
            }
            Host::Ipv6(v6) => {
                self.check_literal(IpAddr::V6(v6))?;
                Vec::new()
            }
            Host::Domain(name) => {
                let name = normalize_host(name);
                if name.is_empty() {
                    return Err(ValidationError::MalformedUri("empty host".to_string()));
                }
                if self.policy.is_blocked_host(&name) {
                    return Err(ValidationError::BlockedHost { host: name });
                }
                if self.policy.has_allow_list() && !self.policy.is_allowlisted(&name, None) {
                    return Err(ValidationError::HostNotAllowlisted { host: name });
                }
                let port = url.port_or_known_default().ok_or_else(|| {
                    ValidationError::MalformedUri("no port for scheme".to_string())
                })?;
                self.resolve_checked(&name, port).await?
            }
        };

        let mut clean = url.clone();
        clean.set_fragment(None);
        // Credentials never travel in the URL; only fails for hostless URLs
        let _ = clean.set_username("");
        let _ = clean.set_password(None);

        Ok(ValidatedTarget {
            url: clean,
            addrs,
            trusted: false,
        })
    }

    /// Synchronous check of a host string without DNS. Used to filter
    /// response headers that point somewhere internal.
    pub fn is_literal_blocked(&self, host: &str) -> bool {
        let host = normalize_host(host);
        let bare = host.trim_start_matches('[').trim_end_matches(']');

        match bare.parse::<IpAddr>() {
            Ok(ip) => self.policy.is_blocked_ip(ip),
            Err(_) => self.policy.is_blocked_host(bare),
        }
    }

    fn check_literal(&self, ip: IpAddr) -> Result<(), ValidationError> {
        if self.policy.is_blocked_ip(ip) {
            return Err(ValidationError::BlockedHost {
                host: ip.to_string(),
            });
        }

        let host = ip.to_string();
        if self.policy.has_allow_list() && !self.policy.is_allowlisted(&host, Some(ip)) {
            return Err(ValidationError::HostNotAllowlisted { host });
        }

        Ok(())
    }

    fn check_port(&self, url: &Url) -> Result<(), ValidationError> {
        match url.port() {
            Some(port) if self.policy.is_blocked_port(port) => {
                Err(ValidationError::PortNotAllowed { port })
            }
            _ => Ok(()),
        }
    }

    /// Resolve under the DNS timeout and reject if any answer is blocked.
    /// Every failure mode rejects; nothing here falls through to dialing.
    async fn resolve_checked(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Vec<SocketAddr>, ValidationError> {
        let lookup = self.resolver.resolve(host, port);
        let addrs = match tokio::time::timeout(self.policy.dns_timeout(), lookup).await {
            Err(_) => {
                debug!(host, "DNS resolution timed out");
                return Err(ValidationError::MalformedUri(
                    "DNS resolution timed out".to_string(),
                ));
            }
            Ok(Err(e)) => {
                debug!(host, error = %e, "DNS resolution failed");
                return Err(ValidationError::MalformedUri(
                    "host could not be resolved".to_string(),
                ));
            }
            Ok(Ok(addrs)) => addrs,
        };

        if addrs.is_empty() {
            return Err(ValidationError::MalformedUri(
                "host could not be resolved".to_string(),
            ));
        }

        if let Some(blocked) = addrs.iter().find(|a| self.policy.is_blocked_ip(a.ip())) {
            debug!(host, addr = %blocked.ip(), "host resolves to a blocked address");
            return Err(ValidationError::BlockedHost {
                host: host.to_string(),
            });
        }

        debug!(host, count = addrs.len(), "host resolved to permitted addresses");
        Ok(addrs)
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}
