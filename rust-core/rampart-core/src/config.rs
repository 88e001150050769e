//! # Configuration
//!
//! Key/value configuration behind [`ConfigProvider`]. Keys are bare
//! (`ADDRESS`); [`EnvConfig`] reads them from `RAMPART_`-prefixed
//! environment variables. Values that fail to parse are start-up errors.

use crate::auth::{Authenticator, JwtConfig, StaticApiKeys};
use crate::error::{Error, Result};
use crate::server::ServerConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RAMPART_";

/// Source of string configuration values
pub trait ConfigProvider: Send + Sync {
    /// Value for `key`, if set
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads `RAMPART_<KEY>` from the process environment
#[derive(Debug, Clone)]
pub struct EnvConfig {
    prefix: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl EnvConfig {
    /// Use the `RAMPART_` prefix
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different prefix
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ConfigProvider for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{key}", self.prefix)).ok()
    }
}

/// In-memory values
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    /// No values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigProvider for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

fn parsed<T>(provider: &dyn ConfigProvider, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    provider
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::config(key, format!("invalid value '{raw}': {e}")))
        })
        .transpose()
}

fn flag(provider: &dyn ConfigProvider, key: &str) -> Result<Option<bool>> {
    provider
        .get(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::config(key, format!("expected a boolean, got '{raw}'"))),
        })
        .transpose()
}

impl ServerConfig {
    /// Defaults overridden by `ADDRESS`, `MAX_BODY_SIZE`, `SHUTDOWN_TIMEOUT_SECS`, `KEEP_ALIVE`
    ///
    /// # Errors
    ///
    /// `Error::Config` for values that do not parse.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self> {
        let mut config = Self::default();
        if let Some(address) = parsed::<SocketAddr>(provider, "ADDRESS")? {
            config.address = address;
        }
        if let Some(size) = parsed::<usize>(provider, "MAX_BODY_SIZE")? {
            config.max_body_size = size;
        }
        if let Some(secs) = parsed::<u64>(provider, "SHUTDOWN_TIMEOUT_SECS")? {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(keep_alive) = flag(provider, "KEEP_ALIVE")? {
            config.keep_alive = keep_alive;
        }
        Ok(config)
    }
}

/// Pipeline behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Honour `X-Tx-Rollback`, `X-Wait-Seconds` and `X-Tx-Lock-Wait-Timeout-Seconds`
    pub test_directives: bool,
    /// Cap on injected delay
    pub max_wait: Duration,
    /// Transaction setting the row-level-security stage writes the tenant to
    pub rls_setting: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            test_directives: false,
            max_wait: Duration::from_secs(30),
            rls_setting: "app.tenant_id".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `TEST_DIRECTIVES`, `MAX_WAIT_SECONDS`, `RLS_SETTING`
    ///
    /// # Errors
    ///
    /// `Error::Config` for values that do not parse.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self> {
        let mut config = Self::default();
        if let Some(enabled) = flag(provider, "TEST_DIRECTIVES")? {
            config.test_directives = enabled;
        }
        if let Some(secs) = parsed::<u64>(provider, "MAX_WAIT_SECONDS")? {
            config.max_wait = Duration::from_secs(secs);
        }
        if let Some(setting) = provider.get("RLS_SETTING").filter(|s| !s.trim().is_empty()) {
            config.rls_setting = setting.trim().to_string();
        }
        Ok(config)
    }
}

/// Storage connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `sqlite:` or `postgres://` URL
    pub url: String,
    /// Pool size
    pub max_connections: Option<u32>,
}

impl DatabaseConfig {
    /// Read `DATABASE_URL` (required) and `DATABASE_MAX_CONNECTIONS`
    ///
    /// # Errors
    ///
    /// `Error::Config` when the URL is missing or the pool size does not parse.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self> {
        let url = provider
            .get("DATABASE_URL")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::config("DATABASE_URL", "is required"))?;
        Ok(Self {
            url,
            max_connections: parsed::<u32>(provider, "DATABASE_MAX_CONNECTIONS")?,
        })
    }
}

/// Build the authenticator from `JWT_SECRET` and `API_KEYS`
///
/// # Errors
///
/// `Error::Config` for malformed API key entries.
pub fn authenticator_from_provider(provider: &dyn ConfigProvider) -> Result<Authenticator> {
    let mut authenticator = Authenticator::new();
    if let Some(secret) = provider.get("JWT_SECRET").filter(|s| !s.is_empty()) {
        authenticator = authenticator.with_jwt(JwtConfig::new(&secret));
    }
    if let Some(entries) = provider.get("API_KEYS") {
        let keys = StaticApiKeys::parse(&entries)?;
        if !keys.is_empty() {
            authenticator = authenticator.with_api_keys(keys);
        }
    }
    Ok(authenticator)
}

/// Directory schema documents are read from (`SCHEMA_ROOT`, default `schemas`)
#[must_use]
pub fn schema_root(provider: &dyn ConfigProvider) -> String {
    provider
        .get("SCHEMA_ROOT")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "schemas".to_string())
}
