//! The storage collaborator contract.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationSignal;
use crate::error::StorageResult;

/// Record field carrying the optimistic-concurrency tag.
///
/// Reads fill it in from the backend; writes with a value other than `"*"` are
/// conditional on it.
pub const ETAG_FIELD: &str = "eTag";

/// A stored document: field name to arbitrary JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Opaque identifier naming one logical record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap a key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for StorageKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Returns the ETag a write should be conditional on, if any.
///
/// A missing field, a non-string value, or the wildcard `"*"` all mean an
/// unconditional overwrite.
#[must_use]
pub fn record_etag(record: &Record) -> Option<&str> {
    record
        .get(ETAG_FIELD)
        .and_then(serde_json::Value::as_str)
        .filter(|etag| !etag.is_empty() && *etag != "*")
}

/// Key/value storage shared between concurrent readers and writers.
///
/// Implementations must be safe for concurrent use through `&self`; the probe
/// holds one instance behind an `Arc` and never locks around it.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the records stored under `keys`.
    ///
    /// Keys with no stored record are absent from the result.
    ///
    /// # Errors
    /// Returns [`StorageError::Cancelled`](crate::StorageError::Cancelled) if
    /// `cancel` fires while waiting, or a backend error.
    async fn read(
        &self,
        keys: &[StorageKey],
        cancel: &CancellationSignal,
    ) -> StorageResult<HashMap<StorageKey, Record>>;

    /// Upsert every entry of `changes`.
    ///
    /// # Errors
    /// Returns [`StorageError::Cancelled`](crate::StorageError::Cancelled) if
    /// `cancel` fires while waiting,
    /// [`StorageError::PreconditionFailed`](crate::StorageError::PreconditionFailed)
    /// if a conditional write loses, or a backend error.
    async fn write(
        &self,
        changes: &HashMap<StorageKey, Record>,
        cancel: &CancellationSignal,
    ) -> StorageResult<()>;

    /// Remove the records stored under `keys`. Missing keys are ignored.
    ///
    /// # Errors
    /// Returns [`StorageError::Cancelled`](crate::StorageError::Cancelled) if
    /// `cancel` fires while waiting, or a backend error.
    async fn delete(&self, keys: &[StorageKey], cancel: &CancellationSignal) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn record_etag_absent() {
        assert_eq!(record_etag(&record(json!({ "a": 1 }))), None);
    }

    #[test]
    fn record_etag_wildcard_is_unconditional() {
        assert_eq!(record_etag(&record(json!({ "eTag": "*" }))), None);
        assert_eq!(record_etag(&record(json!({ "eTag": "" }))), None);
    }

    #[test]
    fn record_etag_present() {
        assert_eq!(
            record_etag(&record(json!({ "eTag": "\"0x8D\"" }))),
            Some("\"0x8D\"")
        );
    }

    #[test]
    fn record_etag_non_string_ignored() {
        assert_eq!(record_etag(&record(json!({ "eTag": 5 }))), None);
    }

    #[test]
    fn storage_key_display_and_serde() {
        let key = StorageKey::from("MyAmazingStorageKey");
        assert_eq!(key.to_string(), "MyAmazingStorageKey");
        assert_eq!(
            serde_json::to_string(&key).expect("serialize"),
            "\"MyAmazingStorageKey\""
        );
    }
}
