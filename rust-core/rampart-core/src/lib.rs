//! # Rampart Core
//!
//! Request pipeline for JSON HTTP services backed by a transactional store.
//!
//! ## Architecture
//!
//! Every matched request runs through an ordered list of stages around a
//! domain handler. Each request gets its own storage transaction before any
//! domain work; the transaction is committed or rolled back exactly once on
//! the way out. Validation failures, auth rejections and domain errors all
//! reach the client as a JSON array of `{code, message, validationErrors}`.
//!
//! ## Modules
//!
//! - `server` - HTTP server built on Hyper
//! - `router` - Routing using matchit (radix trie)
//! - `route` - Route patterns and endpoint definitions
//! - `request` - HTTP request wrapper with headers and query parsing
//! - `middleware` - Stage trait, request context and pipeline runner
//! - `stages` - The standard stage set
//! - `auth` - Bearer-token and API-key authentication
//! - `schema` - JSON Schema loading, caching and validation
//! - `registry` - Error codes, statuses and the error response contract
//! - `query` - Query-string filter, sort and paging parser
//! - `storage` - Storage options, pages and SQL rendering
//! - `modeller` - Per-request transaction handle
//! - `database` - SQLx database connectivity (SQLite, PostgreSQL)
//! - `config` - Configuration providers
//! - `json` - JSON parsing with simd-json
//! - `validation` - Structured validation details
//! - `types` - Path parameter types and conversion
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod json;
pub mod middleware;
pub mod modeller;
pub mod query;
pub mod registry;
pub mod request;
pub mod route;
pub mod router;
pub mod schema;
pub mod server;
pub mod stages;
pub mod storage;
pub mod types;
pub mod validation;

#[cfg(test)]
mod testing;

pub use auth::{Authentication, Authenticator};
pub use config::{ConfigProvider, EnvConfig, PipelineConfig};
pub use database::{DatabasePool, DbValue};
pub use error::{Error, Result};
pub use json::{parse_json, to_json};
pub use middleware::{DomainHandler, HandlerContext, Pipeline, Stage};
pub use modeller::ModellerHandle;
pub use registry::{DomainError, DomainErrors};
pub use request::Request;
pub use route::Endpoint;
pub use router::{Method, Router};
pub use schema::{SchemaBundle, SchemaCache, SchemaRef};
pub use server::{Response, Server, ServerConfig};
pub use stages::PipelineDeps;
pub use storage::{Page, StorageOptions};
pub use types::{ParamType, ParamValue, PathParams};
pub use validation::{ValidationDetail, ValidationErrors, ValidationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
