//! Configuration file loading, merging and environment overrides

use super::schema::Config;
use super::validator::ConfigValidator;
use crate::error::{ProxyError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENV_PREFIX: &str = "MCP_RELAY_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        // Priority order:
        // 1. $MCP_RELAY_CONFIG
        // 2. $XDG_CONFIG_HOME/mcp-relay/config.toml
        // 3. ~/.config/mcp-relay/config.toml

        if let Ok(path) = env::var("MCP_RELAY_CONFIG") {
            return PathBuf::from(path);
        }

        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("mcp-relay/config.toml");
        }

        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".config/mcp-relay/config.toml");
        }

        PathBuf::from("config.toml")
    }

    /// Load config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ProxyError::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load built-in configuration embedded in the binary
    pub fn load_builtin() -> Result<Config> {
        const BUILTIN_TOML: &str = include_str!("../builtin-config.toml");
        let config: Config = toml::from_str(BUILTIN_TOML)?;
        Ok(config)
    }

    /// Merge user config on top of built-in config.
    /// Groups are extended/overridden by name, routes by path; the user's
    /// server and policy tables replace the built-in ones.
    pub fn merge_configs(builtin: Config, user: Config) -> Config {
        let mut merged = builtin;

        for (name, group) in user.groups {
            merged.groups.insert(name, group);
        }

        for route in user.routes {
            match merged.routes.iter_mut().find(|r| r.path == route.path) {
                Some(existing) => *existing = route,
                None => merged.routes.push(route),
            }
        }

        merged.server = user.server;
        merged.policy = user.policy;

        merged
    }

    /// Load config with built-in as lowest-priority fallback
    /// Priority: User config > Built-in config
    pub fn load_with_builtins() -> Result<Config> {
        let builtin = Self::load_builtin()?;
        let path = Self::default_config_path();

        if path.exists() {
            let user = Self::load_from_file(&path)?;
            Ok(Self::merge_configs(builtin, user))
        } else {
            tracing::debug!("User config not found at {:?}, using built-in defaults", path);
            Ok(builtin)
        }
    }

    /// Load config from optional path or default with built-in merge
    /// Priority: Explicit path > User config > Built-in config
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config> {
        if let Some(p) = path {
            let user = Self::load_from_file(&p)?;
            let builtin = Self::load_builtin()?;
            Ok(Self::merge_configs(builtin, user))
        } else {
            Self::load_with_builtins()
        }
    }

    /// Full startup load: files, then process environment, then the command
    /// line listen override, then validation.
    pub fn load_for_startup(path: Option<PathBuf>, listen: Option<String>) -> Result<Config> {
        let config = Self::load_or_default(path)?;
        let mut config = Self::apply_env(config, |key| env::var(key).ok())?;
        if let Some(listen) = listen {
            config.server.listen = listen;
        }
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply `MCP_RELAY_*` overrides read through `lookup`.
    ///
    /// List-valued variables are comma separated. Network, host and allow-list
    /// variables add to the configured lists; scalar variables replace them.
    pub fn apply_env<F>(mut config: Config, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        };

        if let Some((_, v)) = var("LISTEN") {
            config.server.listen = v;
        }

        let policy = &mut config.policy;

        if let Some((_, v)) = var("ALLOWED_SCHEMES") {
            policy.allowed_schemes = split_list(&v).map(|s| s.to_ascii_lowercase()).collect();
        }
        if let Some((_, v)) = var("BLOCKED_NETWORKS") {
            policy.blocked_networks.extend(split_list(&v).map(str::to_string));
        }
        if let Some((_, v)) = var("BLOCKED_HOSTS") {
            policy
                .blocked_hosts
                .extend(split_list(&v).map(|s| s.to_ascii_lowercase()));
        }
        if let Some((_, v)) = var("ALLOWED_HOSTS") {
            policy
                .allowed_hosts
                .extend(split_list(&v).map(|s| s.to_ascii_lowercase()));
        }
        if let Some((key, v)) = var("BLOCKED_PORTS") {
            for port in split_list(&v) {
                policy.blocked_ports.push(parse_value(&key, port)?);
            }
        }
        if let Some((key, v)) = var("MAX_REDIRECTS") {
            policy.max_redirects = parse_value(&key, &v)?;
        }
        if let Some((key, v)) = var("REQUEST_TIMEOUT_MS") {
            policy.request_timeout_ms = parse_value(&key, &v)?;
        }
        if let Some((key, v)) = var("STREAM_IDLE_TIMEOUT_MS") {
            policy.stream_idle_timeout_ms = Some(parse_value(&key, &v)?);
        }
        if let Some((key, v)) = var("CONNECT_TIMEOUT_MS") {
            policy.connect_timeout_ms = parse_value(&key, &v)?;
        }
        if let Some((key, v)) = var("DNS_TIMEOUT_MS") {
            policy.dns_timeout_ms = parse_value(&key, &v)?;
        }

        Ok(config)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ProxyError::EnvOverride {
        key: key.to_string(),
        reason: format!("{}: {}", value, e),
    })
}
