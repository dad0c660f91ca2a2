//! Capability sets exchanged during negotiation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::value::{Dict, Value};
use crate::{AppError, Result};

/// Key under which capability flags are nested in the archived object.
const CAPABILITIES_KEY: &str = "capabilities-dictionary";

/// Immutable mapping of named capability flags/counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, u64>);

impl Capabilities {
    /// Empty capability set; used to request a control session.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capability set advertised on the event-delivery channel by default.
    #[must_use]
    pub fn test_session_defaults() -> Self {
        [
            ("XCTIssue capability", 1),
            ("skipped test capability", 1),
            ("test timeout capability", 1),
        ]
        .into_iter()
        .collect()
    }

    /// Value of capability `name`, if declared.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    /// Whether capability `name` is declared with a non-zero value.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v != 0)
    }

    /// Number of declared capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no capabilities are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Capabilities this side requires that the peer also acknowledged.
    ///
    /// Required capabilities the peer did not acknowledge are dropped from
    /// the effective set and logged.
    #[must_use]
    pub fn effective(&self, acknowledged: &Capabilities) -> Capabilities {
        let mut effective = BTreeMap::new();
        for (name, value) in &self.0 {
            if acknowledged.supports(name) {
                effective.insert(name.clone(), *value);
            } else {
                debug!(capability = name.as_str(), "capability not acknowledged by peer");
            }
        }
        Capabilities(effective)
    }

    /// Encode as the archived capability object.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EncodingFailed`] if a counter exceeds `i64::MAX`.
    pub fn to_value(&self) -> Result<Value> {
        let mut flags = Dict::new();
        for (name, value) in &self.0 {
            flags.insert(name.clone(), Value::try_from(*value)?);
        }
        let mut root = Dict::new();
        root.insert(CAPABILITIES_KEY.to_owned(), Value::Dict(flags));
        Ok(Value::Dict(root))
    }

    /// Decode a capability object returned by the peer.
    ///
    /// Accepts both the wrapped form produced by [`Capabilities::to_value`]
    /// and a bare flag mapping.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EncodingFailed`] if the value is not a mapping of
    /// non-negative integers (booleans count as 0/1).
    pub fn from_value(value: &Value) -> Result<Self> {
        let root = value
            .as_dict()
            .ok_or_else(|| AppError::EncodingFailed(format!(
                "capabilities: expected dict, got {}",
                value.kind()
            )))?;
        let flags = match root.get(CAPABILITIES_KEY) {
            Some(inner) => inner.as_dict().ok_or_else(|| {
                AppError::EncodingFailed("capabilities: nested flags must be a dict".into())
            })?,
            None => root,
        };

        let mut caps = BTreeMap::new();
        for (name, flag) in flags {
            let parsed = match flag {
                Value::Boolean(b) => u64::from(*b),
                other => other.as_u64().ok_or_else(|| {
                    AppError::EncodingFailed(format!(
                        "capabilities: flag '{name}' must be a non-negative integer"
                    ))
                })?,
            };
            caps.insert(name.clone(), parsed);
        }
        Ok(Self(caps))
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for Capabilities {
    fn from_iter<T: IntoIterator<Item = (K, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
