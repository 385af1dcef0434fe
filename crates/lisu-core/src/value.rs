//! Typed parameter values
//!
//! Commands and mode guards exchange loosely structured key/value data.
//! `ParamValue` gives that data a closed set of variants so type and range
//! checks can be performed without runtime introspection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered map of named parameter values.
///
/// `BTreeMap` keeps iteration deterministic, which matters for validation
/// error reporting (the first offending parameter wins).
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Declared type of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Boolean,
    Integer,
    Float,
    String,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParamType::Boolean => "boolean",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::String => "string",
        };
        f.write_str(s)
    }
}

/// A single parameter or state-variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// The `ParamType` this value carries
    pub fn type_of(&self) -> ParamType {
        match self {
            ParamValue::Bool(_) => ParamType::Boolean,
            ParamValue::Int(_) => ParamType::Integer,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Text(_) => ParamType::String,
        }
    }

    /// Check this value against a declared type
    pub fn matches(&self, expected: ParamType) -> bool {
        self.type_of() == expected
    }

    /// Numeric view for range checks.
    /// Returns `None` for non-numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}
