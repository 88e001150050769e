//! # Validation Module
//!
//! Structured validation details attached to 400-class errors.
//!
//! A detail locates the offending value with a `dataPath` rooted at `$`
//! (`$.items[0].name`), the same convention the schema validator emits.

use serde::Serialize;
use std::collections::HashMap;

/// Root marker for data paths
pub const DATA_PATH_ROOT: &str = "$";

/// A single validation failure for a specific location in the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDetail {
    /// Location of the value (e.g., "$.email", "$.user.addresses[0].city")
    pub data_path: String,
    /// Human-readable error message
    pub message: String,
}

impl ValidationDetail {
    /// Create a new detail
    pub fn new(data_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            data_path: data_path.into(),
            message: message.into(),
        }
    }

    /// Create a detail for a top-level field (`$.<field>`)
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self::new(format!("{DATA_PATH_ROOT}.{field}"), message)
    }

    /// Create a "required field" detail
    pub fn required(field: &str) -> Self {
        Self::field(field, "is required")
    }
}

/// Collection of validation details
///
/// Allows aggregating multiple failures for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    /// List of details, in discovery order
    pub errors: Vec<ValidationDetail>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detail
    pub fn add(&mut self, error: ValidationDetail) {
        self.errors.push(error);
    }

    /// Add a required field detail
    pub fn add_required(&mut self, field: &str) {
        self.add(ValidationDetail::required(field));
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Group details by data path
    #[must_use]
    pub fn by_path(&self) -> HashMap<&str, Vec<&ValidationDetail>> {
        let mut map: HashMap<&str, Vec<&ValidationDetail>> = HashMap::new();
        for error in &self.errors {
            map.entry(error.data_path.as_str()).or_default().push(error);
        }
        map
    }
}

impl From<Vec<ValidationDetail>> for ValidationErrors {
    fn from(errors: Vec<ValidationDetail>) -> Self {
        Self { errors }
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationDetail;
    type IntoIter = std::vec::IntoIter<ValidationDetail>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Outcome of validating one document against a schema bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the document satisfied the schema
    pub valid: bool,
    /// Normalized details; empty when `valid`
    pub errors: ValidationErrors,
}

impl ValidationResult {
    /// A passing result
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: ValidationErrors::new(),
        }
    }

    /// A failing result carrying `errors`
    #[must_use]
    pub fn invalid(errors: ValidationErrors) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}
