//! Tagged value tree used for remote method arguments and replies.
//!
//! The daemon speaks in loosely typed keyed-object graphs. They are mapped
//! onto [`Value`] at the protocol boundary; typed callers convert through the
//! accessor helpers and report a mismatch as [`AppError::EncodingFailed`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Keyed mapping of values, ordered by key for deterministic encoding.
pub type Dict = BTreeMap<String, Value>;

/// A single node of an argument or reply tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
    /// Boolean flag.
    Boolean(bool),
    /// Raw byte sequence.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Keyed mapping.
    Dict(Dict),
}

impl Value {
    /// Short name of the variant, used in conversion errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Dict(_) => "dict",
        }
    }

    /// Integer payload, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Non-negative integer payload.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    /// String payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean payload. Integers are accepted as truthy when non-zero,
    /// which is how the daemon reports most success flags.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            Self::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Byte payload, if this is a byte sequence.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Sequence payload, if this is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Mapping payload, if this is a dict.
    #[must_use]
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Self::Dict(v) => Some(v),
            _ => None,
        }
    }

    /// Look up `key` when this is a dict.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Convert into a dict or fail with `EncodingFailed` naming `context`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EncodingFailed`] if the value is not a dict.
    pub fn into_dict(self, context: &str) -> Result<Dict> {
        match self {
            Self::Dict(d) => Ok(d),
            other => Err(mismatch(context, "dict", &other)),
        }
    }

    /// Require an integer, failing with `EncodingFailed` naming `context`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EncodingFailed`] if the value is not an integer.
    pub fn expect_i64(&self, context: &str) -> Result<i64> {
        self.as_i64().ok_or_else(|| mismatch(context, "integer", self))
    }

    /// Require a string, failing with `EncodingFailed` naming `context`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EncodingFailed`] if the value is not a string.
    pub fn expect_str(&self, context: &str) -> Result<&str> {
        self.as_str().ok_or_else(|| mismatch(context, "string", self))
    }
}

fn mismatch(context: &str, expected: &str, got: &Value) -> AppError {
    AppError::EncodingFailed(format!(
        "{context}: expected {expected}, got {}",
        got.kind()
    ))
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<Dict> for Value {
    fn from(v: Dict) -> Self {
        Self::Dict(v)
    }
}

impl TryFrom<u64> for Value {
    type Error = AppError;

    fn try_from(v: u64) -> Result<Self> {
        i64::try_from(v)
            .map(Self::Integer)
            .map_err(|_| AppError::EncodingFailed(format!("integer {v} out of range")))
    }
}
