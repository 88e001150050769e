//! # Route Metadata
//!
//! Path patterns and the endpoint definition each route dispatches to.

use crate::middleware::DomainHandler;
use crate::schema::SchemaBundle;
use crate::types::ParamType;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Parsed route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    /// Original path pattern (e.g., "/dungeons/{id:int}")
    pub path_pattern: String,
    /// Normalized path for matchit (e.g., "/dungeons/{id}")
    pub match_pattern: String,
    /// Parameter name to type mapping
    pub param_types: HashMap<String, ParamType>,
}

impl RoutePattern {
    /// Parse a pattern, stripping type specifiers for matchit
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let mut param_types = HashMap::new();
        let mut normalized_parts = Vec::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if let Some((name, param_type)) = crate::types::parse_param_pattern(segment) {
                normalized_parts.push(format!("{{{name}}}"));
                param_types.insert(name, param_type);
            } else {
                normalized_parts.push(segment.to_string());
            }
        }

        let match_pattern = if normalized_parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", normalized_parts.join("/"))
        };

        Self {
            path_pattern: path.to_string(),
            match_pattern,
            param_types,
        }
    }

    /// Declared type of a parameter; undeclared names are strings
    #[must_use]
    pub fn param_type(&self, name: &str) -> ParamType {
        self.param_types.get(name).copied().unwrap_or_default()
    }
}

/// What a route requires and what it calls
#[derive(Clone)]
pub struct Endpoint {
    /// Skip authentication, authorization and row-level security
    pub public: bool,
    /// Any one of these admits the caller; empty admits every authenticated caller
    pub permissions: BTreeSet<String>,
    /// Schema for the query-parameter document
    pub query_schema: Option<SchemaBundle>,
    /// Schema for the path-parameter document
    pub path_schema: Option<SchemaBundle>,
    /// Schema for the request body (mutating methods only)
    pub body_schema: Option<SchemaBundle>,
    /// Paged listing: filters, sort and paging are read from the query string
    pub collection: bool,
    /// Domain handler
    pub handler: Arc<dyn DomainHandler>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("public", &self.public)
            .field("permissions", &self.permissions)
            .field("query_schema", &self.query_schema)
            .field("path_schema", &self.path_schema)
            .field("body_schema", &self.body_schema)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// An authenticated endpoint with no schemas
    pub fn new(handler: impl DomainHandler + 'static) -> Self {
        Self {
            public: false,
            permissions: BTreeSet::new(),
            query_schema: None,
            path_schema: None,
            body_schema: None,
            collection: false,
            handler: Arc::new(handler),
        }
    }

    /// Allow anonymous callers
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Require one of `permissions`
    #[must_use]
    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the query document against `bundle`
    #[must_use]
    pub fn query_schema(mut self, bundle: SchemaBundle) -> Self {
        self.query_schema = Some(bundle);
        self
    }

    /// Validate the path-parameter document against `bundle`
    #[must_use]
    pub fn path_schema(mut self, bundle: SchemaBundle) -> Self {
        self.path_schema = Some(bundle);
        self
    }

    /// Validate request bodies against `bundle`
    #[must_use]
    pub fn body_schema(mut self, bundle: SchemaBundle) -> Self {
        self.body_schema = Some(bundle);
        self
    }

    /// Mark as a paged listing
    #[must_use]
    pub const fn collection(mut self) -> Self {
        self.collection = true;
        self
    }

    /// Every schema bundle this endpoint references
    pub fn schemas(&self) -> impl Iterator<Item = &SchemaBundle> {
        [&self.query_schema, &self.path_schema, &self.body_schema]
            .into_iter()
            .flatten()
    }
}
