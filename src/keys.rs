//! Store key formatting.
//!
//! Derives store keys of the form `{prefix}/{source}/{index}` (optionally
//! with a nanosecond timestamp suffix) from a logical source tag and a
//! monotonically increasing index. Pure functions, no side effects; keys
//! are unique per (source, index) pair within a run.

use thiserror::Error;

/// A store key: a string path addressing one object in the remote store.
pub type StoreKey = String;

/// Errors produced by key formatting.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid key component {component:?}: {reason}")]
    InvalidComponent { component: String, reason: String },
}

/// Formatter producing store keys under a fixed namespace prefix.
#[derive(Debug, Clone)]
pub struct KeyFormatter {
    prefix: String,
}

impl KeyFormatter {
    /// Create a formatter for the given namespace prefix.
    ///
    /// The prefix must be non-empty; a trailing `/` is stripped so that
    /// formatted keys never contain empty path segments.
    pub fn new(prefix: impl Into<String>) -> Result<Self, KeyError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(KeyError::InvalidComponent {
                component: prefix,
                reason: "prefix must not be empty".to_string(),
            });
        }

        Ok(Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    /// The namespace prefix of this formatter.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Format a key as `{prefix}/{source}/{index}`.
    pub fn format(&self, source: &str, index: u64) -> Result<StoreKey, KeyError> {
        validate_source(source)?;
        Ok(format!("{}/{}/{}", self.prefix, source, index))
    }

    /// Format a key as `{prefix}/{source}/{index}_{timestamp_ns}`.
    ///
    /// The timestamp is a nanosecond-resolution integer, rendered as a
    /// plain decimal string.
    pub fn format_with_timestamp(
        &self,
        source: &str,
        index: u64,
        timestamp_ns: u64,
    ) -> Result<StoreKey, KeyError> {
        validate_source(source)?;
        Ok(format!(
            "{}/{}/{}_{}",
            self.prefix, source, index, timestamp_ns
        ))
    }
}

/// Reject source tags that would break the key's path structure.
fn validate_source(source: &str) -> Result<(), KeyError> {
    if source.is_empty() {
        return Err(KeyError::InvalidComponent {
            component: source.to_string(),
            reason: "source tag must not be empty".to_string(),
        });
    }
    if source.contains('/') {
        return Err(KeyError::InvalidComponent {
            component: source.to_string(),
            reason: "source tag must not contain '/'".to_string(),
        });
    }
    Ok(())
}
