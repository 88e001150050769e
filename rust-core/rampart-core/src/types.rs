//! # Path Parameter Types
//!
//! Typed path segments (`/dungeons/{id:int}`) and their converted values.
//!
//! Conversion happens in the parameter stage, not in the router, so a
//! segment that does not parse is reported as
//! `validation.invalid_path_parameter` instead of silently matching as text.

use crate::error::{Error, Result};
use crate::query::percent_decode;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Declared type of a path parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    /// No conversion
    #[default]
    String,
    /// Parses to i64
    Int,
    /// Parses to f64
    Float,
    /// Parses "true"/"false" or "1"/"0"
    Bool,
}

impl ParamType {
    /// Parse type specifier from route pattern (e.g., "int" from "{id:int}")
    #[must_use]
    pub fn from_specifier(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "int" | "integer" | "i64" => Self::Int,
            "float" | "f64" | "number" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            _ => Self::String,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Converted parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Text
    String(String),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Boolean
    Bool(bool),
}

impl ParamValue {
    /// Render back to text
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }

    /// Borrow as text if String variant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64 if Int variant
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if Float variant
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as bool if Bool variant
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// JSON form used for path-schema validation
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Percent-decode and convert one raw path segment
///
/// # Errors
///
/// Returns `Error::InvalidPathParameter` naming the parameter when the
/// segment does not parse as `param_type`.
pub fn convert_param(name: &str, raw: &str, param_type: ParamType) -> Result<ParamValue> {
    let decoded = percent_decode(raw, false);
    let raw = decoded.as_str();
    let invalid = || Error::InvalidPathParameter {
        name: name.to_string(),
        reason: format!("'{raw}' is not a valid {param_type}"),
    };
    match param_type {
        ParamType::String => Ok(ParamValue::String(raw.to_string())),
        ParamType::Int => raw.parse::<i64>().map(ParamValue::Int).map_err(|_| invalid()),
        ParamType::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ParamValue::Float)
            .ok_or_else(invalid),
        ParamType::Bool => match raw.to_lowercase().as_str() {
            "true" | "1" => Ok(ParamValue::Bool(true)),
            "false" | "0" => Ok(ParamValue::Bool(false)),
            _ => Err(invalid()),
        },
    }
}

/// Parse a path segment pattern to extract name and type
///
/// - `{id}` -> ("id", `ParamType::String`)
/// - `{id:int}` -> ("id", `ParamType::Int`)
///
/// Returns `None` for static segments.
#[must_use]
pub fn parse_param_pattern(segment: &str) -> Option<(String, ParamType)> {
    let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
    match inner.split_once(':') {
        Some((name, type_spec)) => Some((name.to_string(), ParamType::from_specifier(type_spec))),
        None => Some((inner.to_string(), ParamType::String)),
    }
}

/// Converted path parameters of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathParams {
    values: HashMap<String, ParamValue>,
}

impl PathParams {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a converted value
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    /// Get a value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Get an `int` parameter
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }

    /// Get a text parameter
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON object for path-schema validation
    #[must_use]
    pub fn to_document(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }
}
