//! Field values
//!
//! The value a field accumulates while open, and the value stored in the
//! field history once it closes. Numbers are kept as wrapping 64-bit
//! integers; `string` fields accumulate one character per byte.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed (or transformed) field value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(i64),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value, if it is a number
    pub fn as_number(&self) -> Option<i64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// Text view of the value, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }

    /// Truthiness used by guards and logical operators
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Number(n) => *n != 0,
            FieldValue::Text(s) => !s.is_empty(),
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Number(0)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}
