//! # Error Handling
//!
//! Infrastructure faults for the rampart core.
//!
//! These never reach a client verbatim. The pipeline logs them and answers
//! with an opaque `internal_error`; client-visible failures live in
//! [`crate::registry::DomainError`].

use thiserror::Error;

/// Result type alias for rampart operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core fault types for the rampart runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Router failed to match the requested path
    #[error("No route found for path: {path}")]
    RouteNotFound {
        /// The path that wasn't matched
        path: String,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Path parameter could not be converted to its declared type
    #[error("Invalid path parameter {name}: {reason}")]
    InvalidPathParameter {
        /// Parameter name
        name: String,
        /// Why conversion failed
        reason: String,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload could not be decoded as JSON
    #[error("JSON decode error: {reason}")]
    Decode {
        /// Parser message
        reason: String,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// A schema document is missing, malformed, or failed to compile
    #[error("Schema error in {location}: {reason}")]
    Schema {
        /// Full path or bundle identity of the offending schema
        location: String,
        /// What went wrong
        reason: String,
    },

    /// A transaction operation was attempted with no open transaction
    #[error("Transaction not open: cannot {operation}")]
    TransactionClosed {
        /// The attempted operation (commit, rollback, ...)
        operation: &'static str,
    },

    /// A named statement was requested that the query catalog does not hold
    #[error("Unknown statement: {name}")]
    UnknownStatement {
        /// Statement name
        name: String,
    },

    /// Configuration value missing or invalid
    #[error("Configuration error for {key}: {reason}")]
    Config {
        /// Configuration key
        key: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Authentication subsystem was used in a way its contract forbids
    #[error("Authentication misconfigured: {message}")]
    AuthMisconfigured {
        /// Description of the violation
        message: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// Wrap any displayable storage failure
    pub fn database(message: impl std::fmt::Display) -> Self {
        Self::Database {
            message: message.to_string(),
        }
    }

    pub(crate) fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err)
    }
}
