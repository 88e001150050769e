//! # Router
//!
//! Radix-trie routing with `matchit`, one trie per method.
//!
//! Matching only extracts raw segments. Typed conversion is left to the
//! parameter stage so failures surface as validation errors.

use crate::error::{Error, Result};
use crate::route::{Endpoint, RoutePattern};
use crate::types::ParamType;
use matchit::Router as MatchitRouter;
use std::collections::HashMap;
use std::sync::Arc;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Methods whose body is validated and handed to the handler
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    /// Map a hyper method; extension methods are unsupported
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        match *method {
            hyper::Method::GET => Some(Self::Get),
            hyper::Method::POST => Some(Self::Post),
            hyper::Method::PUT => Some(Self::Put),
            hyper::Method::DELETE => Some(Self::Delete),
            hyper::Method::PATCH => Some(Self::Patch),
            hyper::Method::HEAD => Some(Self::Head),
            hyper::Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
        }
    }
}

/// Matched route with raw path segments
#[derive(Debug, Clone)]
pub struct Match {
    /// Endpoint the route dispatches to
    pub endpoint: Arc<Endpoint>,
    /// Pattern the path matched
    pub pattern: Arc<RoutePattern>,
    /// Raw segments in path order, with their declared types
    pub params: Vec<(String, String, ParamType)>,
}

#[derive(Clone)]
struct RouteEntry {
    pattern: Arc<RoutePattern>,
    endpoint: Arc<Endpoint>,
}

#[derive(Clone)]
struct MethodRoutes {
    router: MatchitRouter<usize>,
    routes: Vec<RouteEntry>,
}

impl MethodRoutes {
    fn new() -> Self {
        Self {
            router: MatchitRouter::new(),
            routes: Vec::new(),
        }
    }
}

/// Method-aware route table
#[derive(Clone, Default)]
pub struct Router {
    method_routes: HashMap<Method, MethodRoutes>,
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `endpoint` under `method` and `path`
    ///
    /// Supports typed parameters: `/dungeons/{id:int}`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed or
    /// conflicts with an existing route.
    pub fn add_route(&mut self, method: Method, path: &str, endpoint: Endpoint) -> Result<()> {
        let pattern = RoutePattern::parse(path);
        let method_routes = self
            .method_routes
            .entry(method)
            .or_insert_with(MethodRoutes::new);

        let index = method_routes.routes.len();
        method_routes
            .router
            .insert(pattern.match_pattern.clone(), index)
            .map_err(|e| Error::InvalidRoutePattern {
                pattern: path.to_string(),
                reason: e.to_string(),
            })?;

        method_routes.routes.push(RouteEntry {
            pattern: Arc::new(pattern),
            endpoint: Arc::new(endpoint),
        });
        Ok(())
    }

    /// Match a request path against registered routes
    ///
    /// # Errors
    ///
    /// Returns `Error::RouteNotFound` if no route matches the method and path.
    pub fn match_route(&self, method: Method, path: &str) -> Result<Match> {
        let not_found = || Error::RouteNotFound {
            path: path.to_string(),
        };
        let method_routes = self.method_routes.get(&method).ok_or_else(not_found)?;
        let matched = method_routes.router.at(path).map_err(|_| not_found())?;
        let entry = method_routes
            .routes
            .get(*matched.value)
            .ok_or_else(not_found)?;

        let params = matched
            .params
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_string(),
                    entry.pattern.param_type(name),
                )
            })
            .collect();

        Ok(Match {
            endpoint: Arc::clone(&entry.endpoint),
            pattern: Arc::clone(&entry.pattern),
            params,
        })
    }

    /// Every registered endpoint
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.method_routes
            .values()
            .flat_map(|m| m.routes.iter().map(|r| r.endpoint.as_ref()))
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn get(&mut self, path: &str, endpoint: Endpoint) -> Result<()> {
        self.add_route(Method::Get, path, endpoint)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn post(&mut self, path: &str, endpoint: Endpoint) -> Result<()> {
        self.add_route(Method::Post, path, endpoint)
    }

    /// Register a PUT route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn put(&mut self, path: &str, endpoint: Endpoint) -> Result<()> {
        self.add_route(Method::Put, path, endpoint)
    }

    /// Register a DELETE route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn delete(&mut self, path: &str, endpoint: Endpoint) -> Result<()> {
        self.add_route(Method::Delete, path, endpoint)
    }
}
