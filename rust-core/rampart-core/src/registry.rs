//! # Error Registry
//!
//! Maps symbolic error codes to HTTP status codes and default messages, and
//! owns the serialization contract for error responses.
//!
//! The registry is built once per process and never mutated; lookups hand
//! out copies. Errors that cross into a response body are [`DomainError`]s.
//! Anything else a handler returns is an internal fault: it is logged here
//! and replaced with a single opaque `internal_error`.

use crate::server::Response;
use crate::validation::{ValidationDetail, ValidationErrors};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::{error, warn};

/// Symbolic error codes
pub mod codes {
    /// Body did not satisfy the endpoint's request schema
    pub const BODY_NOT_MATCHING_JSON_SCHEMA: &str = "validation.body_not_matching_json_schema";
    /// Body was not parseable JSON
    pub const INVALID_JSON: &str = "validation.invalid_json";
    /// A query parameter failed parsing or schema validation
    pub const INVALID_QUERY_PARAMETER: &str = "validation.invalid_query_parameter";
    /// A path parameter failed conversion or schema validation
    pub const INVALID_PATH_PARAMETER: &str = "validation.invalid_path_parameter";
    /// Requested resource does not exist
    pub const RESOURCE_NOT_FOUND: &str = "resource_not_found";
    /// Caller presented no valid credential
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    /// Caller lacks the permissions the endpoint requires
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// Request body exceeded the configured limit
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    /// A dependency is temporarily unavailable
    pub const UNAVAILABLE: &str = "unavailable";
    /// Opaque server-side failure
    pub const INTERNAL_ERROR: &str = "internal_error";
}

const BAD_REQUEST: u16 = 400;

/// Registry entry describing one error code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescriptor {
    /// Symbolic code
    pub code: &'static str,
    /// HTTP status the code maps to
    pub http_status: u16,
    /// Default human-readable message
    pub message: String,
    /// Structured validation details, empty for non-validation codes
    pub validation_details: ValidationErrors,
}

/// A client-visible error, serialized as one element of the error body array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct DomainError {
    /// Symbolic code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Per-field details for validation failures
    #[serde(skip_serializing_if = "ValidationErrors::is_empty")]
    pub validation_errors: ValidationErrors,
    #[serde(skip)]
    http_status: u16,
}

impl DomainError {
    /// Build from a registered code using the process-wide registry
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        ErrorRegistry::global().new_from_code(code, &[])
    }

    /// Shorthand for `resource_not_found` naming the missing resource
    pub fn not_found(resource: impl fmt::Display) -> Self {
        ErrorRegistry::global().new_from_code(codes::RESOURCE_NOT_FOUND, &[&resource.to_string()])
    }

    /// Replace the message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach validation details
    #[must_use]
    pub fn with_details(mut self, details: impl Into<ValidationErrors>) -> Self {
        self.validation_errors = details.into();
        self
    }

    /// Attach a single validation detail
    #[must_use]
    pub fn with_detail(mut self, detail: ValidationDetail) -> Self {
        self.validation_errors.add(detail);
        self
    }

    /// Change the code, keeping message and details; status follows the new code
    #[must_use]
    pub fn recode(mut self, code: &str) -> Self {
        let registry = ErrorRegistry::global();
        self.http_status = registry.status_of(code);
        self.code = code.to_string();
        self
    }

    /// HTTP status this error maps to
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.http_status
    }

    /// Whether the error belongs to the 400 (bad request) class
    #[must_use]
    pub const fn is_bad_request(&self) -> bool {
        self.http_status == BAD_REQUEST
    }
}

/// Several client-visible errors returned together
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} errors", .0.len())]
pub struct DomainErrors(pub Vec<DomainError>);

/// Process-wide, immutable code registry
#[derive(Debug)]
pub struct ErrorRegistry {
    entries: HashMap<&'static str, (u16, &'static str)>,
}

static REGISTRY: OnceLock<ErrorRegistry> = OnceLock::new();

impl ErrorRegistry {
    /// Build the standard code table
    #[must_use]
    pub fn standard() -> Self {
        let table: [(&'static str, u16, &'static str); 10] = [
            (
                codes::BODY_NOT_MATCHING_JSON_SCHEMA,
                400,
                "Request body does not match the expected schema",
            ),
            (codes::INVALID_JSON, 400, "Request body is not valid JSON"),
            (
                codes::INVALID_QUERY_PARAMETER,
                400,
                "Invalid query parameter",
            ),
            (codes::INVALID_PATH_PARAMETER, 400, "Invalid path parameter"),
            (codes::RESOURCE_NOT_FOUND, 404, "Resource not found"),
            (codes::UNAUTHENTICATED, 401, "Authentication required"),
            (
                codes::UNAUTHORIZED,
                403,
                "Not permitted to perform this operation",
            ),
            (codes::PAYLOAD_TOO_LARGE, 413, "Request body too large"),
            (codes::UNAVAILABLE, 503, "Service temporarily unavailable"),
            (codes::INTERNAL_ERROR, 500, "Internal server error"),
        ];
        Self {
            entries: table
                .into_iter()
                .map(|(code, status, message)| (code, (status, message)))
                .collect(),
        }
    }

    /// The shared registry, built on first use
    pub fn global() -> &'static Self {
        REGISTRY.get_or_init(Self::standard)
    }

    /// Look up a code, returning an independent copy of its descriptor
    #[must_use]
    pub fn lookup(&self, code: &str) -> Option<ErrorDescriptor> {
        self.entries
            .get_key_value(code)
            .map(|(code, (status, message))| ErrorDescriptor {
                code: *code,
                http_status: *status,
                message: (*message).to_string(),
                validation_details: ValidationErrors::new(),
            })
    }

    /// HTTP status for `code`; unknown codes map to 500
    #[must_use]
    pub fn status_of(&self, code: &str) -> u16 {
        self.entries.get(code).map_or(500, |(status, _)| *status)
    }

    /// Construct an error for `code`
    ///
    /// Arguments are appended to the default message (`"Resource not found:
    /// dungeon 7"`). An unregistered code is a programming error and yields
    /// `internal_error`.
    #[must_use]
    pub fn new_from_code(&self, code: &str, args: &[&str]) -> DomainError {
        let Some(descriptor) = self.lookup(code) else {
            warn!(code = %code, "Unregistered error code, substituting internal_error");
            return self.new_from_code(codes::INTERNAL_ERROR, &[]);
        };
        let message = if args.is_empty() {
            descriptor.message
        } else {
            format!("{}: {}", descriptor.message, args.join(", "))
        };
        DomainError {
            code: descriptor.code.to_string(),
            message,
            validation_errors: descriptor.validation_details,
            http_status: descriptor.http_status,
        }
    }

    /// Resolve the status and body for a set of errors
    ///
    /// A single error is written as-is. Several errors are only written
    /// together when every one is 400-class; otherwise the whole response is
    /// escalated to one `internal_error`.
    #[must_use]
    pub fn write(&self, errors: Vec<DomainError>) -> ErrorWrite {
        let escalate = errors.is_empty()
            || (errors.len() > 1 && !errors.iter().all(DomainError::is_bad_request));
        if escalate {
            let internal = self.new_from_code(codes::INTERNAL_ERROR, &[]);
            return ErrorWrite {
                status: internal.http_status,
                errors: vec![internal],
                escalated: true,
            };
        }
        ErrorWrite {
            status: errors[0].http_status,
            errors,
            escalated: false,
        }
    }
}

/// Result of [`ErrorRegistry::write`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorWrite {
    /// Response status
    pub status: u16,
    /// Errors to serialize, in order
    pub errors: Vec<DomainError>,
    /// True when the input was replaced by `internal_error`
    pub escalated: bool,
}

impl ErrorWrite {
    /// Serialize into a JSON response
    #[must_use]
    pub fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.errors).unwrap_or_else(|_| {
            r#"[{"code":"internal_error","message":"Internal server error"}]"#.to_string()
        });
        Response::json(body).with_status(self.status)
    }
}

/// Extract a client-visible error from a generic one
#[must_use]
pub fn to_error(err: &anyhow::Error) -> Option<DomainError> {
    err.downcast_ref::<DomainError>().cloned()
}

/// Extract client-visible errors from several generic ones
///
/// Returns `None` unless every input is a [`DomainError`] or [`DomainErrors`].
#[must_use]
pub fn to_errors(errs: &[anyhow::Error]) -> Option<Vec<DomainError>> {
    let mut out = Vec::with_capacity(errs.len());
    for err in errs {
        if let Some(many) = err.downcast_ref::<DomainErrors>() {
            out.extend(many.0.iter().cloned());
        } else {
            out.push(to_error(err)?);
        }
    }
    Some(out)
}

/// Write `errors` as a response, logging any escalation
#[must_use]
pub fn errors_response(errors: Vec<DomainError>) -> Response {
    let codes: Vec<String> = errors.iter().map(|e| e.code.clone()).collect();
    let write = ErrorRegistry::global().write(errors);
    if write.escalated {
        error!(codes = ?codes, "Refusing to aggregate mixed-class errors, escalating to internal_error");
    }
    write.into_response()
}

/// Write a single error as a response
#[must_use]
pub fn error_response(error: DomainError) -> Response {
    errors_response(vec![error])
}

/// The boundary between handler failures and the response body
///
/// Domain errors are serialized; every other failure is logged with its
/// full chain and answered with an opaque `internal_error`.
#[must_use]
pub fn failure_response(err: &anyhow::Error) -> Response {
    if let Some(many) = err.downcast_ref::<DomainErrors>() {
        return errors_response(many.0.clone());
    }
    if let Some(domain) = to_error(err) {
        return error_response(domain);
    }
    error!(error = ?err, "Unhandled failure, responding with internal_error");
    internal_error_response()
}

/// An opaque 500 response
#[must_use]
pub fn internal_error_response() -> Response {
    error_response(DomainError::from_code(codes::INTERNAL_ERROR))
}
