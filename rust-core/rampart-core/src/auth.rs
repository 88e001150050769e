//! # Authentication
//!
//! Credential sources for non-public endpoints.
//!
//! - `Authorization: Bearer <jwt>`: HS256 token carrying `sub`,
//!   `permissions` and an optional `tenant`.
//! - `X-Authorization: <key>` or `Authorization: ApiKey <key>`: a key
//!   looked up in an [`ApiKeyStore`]. Keys scoped to a tenant are
//!   `restricted`; the row-level-security stage confines them to it.

use crate::error::{Error, Result};
use crate::request::Request;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Bearer and API key header
pub const AUTHORIZATION_HEADER: &str = "authorization";
/// Alternate API key header
pub const X_AUTHORIZATION_HEADER: &str = "x-authorization";

/// How a caller proved its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Signed bearer token
    Bearer,
    /// Pre-shared API key
    ApiKey,
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    /// Caller identity
    pub subject: String,
    /// Granted permissions
    pub permissions: BTreeSet<String>,
    /// Credential kind
    pub method: AuthMethod,
    /// Confined to `tenant` by row-level security
    pub restricted: bool,
    /// Tenant the caller belongs to
    pub tenant: Option<String>,
}

impl Authentication {
    /// Whether any of `required` was granted; an empty requirement admits everyone
    #[must_use]
    pub fn permits(&self, required: &BTreeSet<String>) -> bool {
        required.is_empty() || !self.permissions.is_disjoint(required)
    }
}

/// JWT verification settings
#[derive(Clone)]
pub struct JwtConfig {
    /// JWT decoding key
    pub decoding_key: DecodingKey,
    /// JWT validation settings
    pub validation: Validation,
}

impl JwtConfig {
    /// HS256 with a shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    tenant: Option<String>,
}

/// One registered API key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    /// Owner identity
    pub subject: String,
    /// Granted permissions
    pub permissions: BTreeSet<String>,
    /// Tenant scope; a scoped key is restricted
    pub tenant: Option<String>,
}

/// Lookup of API keys
pub trait ApiKeyStore: Send + Sync {
    /// The record for `key`, if it is registered
    fn lookup(&self, key: &str) -> Option<ApiKeyRecord>;
}

/// API keys held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeys {
    keys: HashMap<String, ApiKeyRecord>,
}

impl StaticApiKeys {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key`
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, record: ApiKeyRecord) -> Self {
        self.keys.insert(key.into(), record);
        self
    }

    /// Parse `key:subject:perm1|perm2[:tenant]` entries separated by commas
    ///
    /// # Errors
    ///
    /// `Error::Config` for entries without a key or subject.
    pub fn parse(entries: &str) -> Result<Self> {
        let mut store = Self::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(4, ':');
            let key = parts.next().filter(|k| !k.is_empty());
            let subject = parts.next().filter(|s| !s.is_empty());
            let (Some(key), Some(subject)) = (key, subject) else {
                return Err(Error::config(
                    "API_KEYS",
                    "entries must look like key:subject:perm1|perm2[:tenant]",
                ));
            };
            let permissions = parts
                .next()
                .unwrap_or_default()
                .split('|')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            let tenant = parts.next().filter(|t| !t.is_empty()).map(str::to_string);
            store = store.with_key(
                key,
                ApiKeyRecord {
                    subject: subject.to_string(),
                    permissions,
                    tenant,
                },
            );
        }
        Ok(store)
    }

    /// Number of registered keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if no keys are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ApiKeyStore for StaticApiKeys {
    fn lookup(&self, key: &str) -> Option<ApiKeyRecord> {
        self.keys.get(key).cloned()
    }
}

/// Why a request was not authenticated
#[derive(Debug)]
pub enum AuthRejection {
    /// No usable credential; answered with `unauthenticated`
    Unauthenticated(String),
    /// The subsystem cannot authenticate anyone; answered with `internal_error`
    Misconfigured(Error),
}

/// Validates the credential on a request
#[derive(Clone, Default)]
pub struct Authenticator {
    jwt: Option<JwtConfig>,
    api_keys: Option<Arc<dyn ApiKeyStore>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("jwt", &self.jwt.is_some())
            .field("api_keys", &self.api_keys.is_some())
            .finish()
    }
}

impl Authenticator {
    /// No credential sources
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept bearer tokens
    #[must_use]
    pub fn with_jwt(mut self, jwt: JwtConfig) -> Self {
        self.jwt = Some(jwt);
        self
    }

    /// Accept API keys from `store`
    #[must_use]
    pub fn with_api_keys(mut self, store: impl ApiKeyStore + 'static) -> Self {
        self.api_keys = Some(Arc::new(store));
        self
    }

    /// Authenticate `request`
    ///
    /// # Errors
    ///
    /// [`AuthRejection::Unauthenticated`] for missing, malformed or rejected
    /// credentials; [`AuthRejection::Misconfigured`] when no credential
    /// source is configured at all.
    pub fn authenticate(&self, request: &Request) -> std::result::Result<Authentication, AuthRejection> {
        if self.jwt.is_none() && self.api_keys.is_none() {
            return Err(AuthRejection::Misconfigured(Error::AuthMisconfigured {
                message: "endpoint requires authentication but no credential source is configured"
                    .to_string(),
            }));
        }

        if let Some(key) = request.header(X_AUTHORIZATION_HEADER) {
            return self.api_key(key.trim());
        }
        let Some(header) = request.header(AUTHORIZATION_HEADER) else {
            return Err(AuthRejection::Unauthenticated("missing credential".to_string()));
        };
        if let Some(token) = header.strip_prefix("Bearer ") {
            return self.bearer(token.trim());
        }
        if let Some(key) = header.strip_prefix("ApiKey ") {
            return self.api_key(key.trim());
        }
        Err(AuthRejection::Unauthenticated(
            "unsupported authorization scheme".to_string(),
        ))
    }

    fn bearer(&self, token: &str) -> std::result::Result<Authentication, AuthRejection> {
        let Some(jwt) = &self.jwt else {
            return Err(AuthRejection::Unauthenticated(
                "bearer tokens are not accepted".to_string(),
            ));
        };
        let data = decode::<Claims>(token, &jwt.decoding_key, &jwt.validation).map_err(|e| {
            warn!(error = %e, "JWT validation failed");
            AuthRejection::Unauthenticated("invalid bearer token".to_string())
        })?;
        Ok(Authentication {
            subject: data.claims.sub,
            permissions: data.claims.permissions.into_iter().collect(),
            method: AuthMethod::Bearer,
            restricted: false,
            tenant: data.claims.tenant,
        })
    }

    fn api_key(&self, key: &str) -> std::result::Result<Authentication, AuthRejection> {
        let record = self
            .api_keys
            .as_ref()
            .and_then(|store| store.lookup(key))
            .ok_or_else(|| AuthRejection::Unauthenticated("unknown API key".to_string()))?;
        Ok(Authentication {
            subject: record.subject,
            permissions: record.permissions,
            method: AuthMethod::ApiKey,
            restricted: record.tenant.is_some(),
            tenant: record.tenant,
        })
    }
}
