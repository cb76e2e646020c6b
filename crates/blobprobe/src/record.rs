//! The fixed key set and the record the writer stores under it.

use std::collections::HashMap;

use blobprobe_store::{Record, StorageKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key the probe reads and writes.
pub const PROBE_KEY: &str = "MyAmazingStorageKey";

/// Constant integer stored in every probe record.
pub const PROBE_CONSTANT: i64 = 13177;

/// The fixed key set, in read order.
#[must_use]
pub fn probe_keys() -> Vec<StorageKey> {
    vec![StorageKey::new(PROBE_KEY)]
}

/// Nested value carried by every probe record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProbeSubRecord {
    /// Always `"Sub"`.
    pub sub_value: String,
}

/// One writer iteration's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProbeRecord {
    /// [`PROBE_CONSTANT`].
    pub value1: i64,
    /// Fresh v4 UUID per iteration.
    pub value2: Uuid,
    /// Nested structure.
    pub value3: ProbeSubRecord,
    /// Creation time (UTC).
    pub value4: DateTime<Utc>,
}

impl ProbeRecord {
    /// Build a record with a new UUID and the current time.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            value1: PROBE_CONSTANT,
            value2: Uuid::new_v4(),
            value3: ProbeSubRecord {
                sub_value: "Sub".to_string(),
            },
            value4: Utc::now(),
        }
    }

    /// Convert into a storage document.
    ///
    /// # Errors
    /// Returns a serialization error if the record cannot be rendered as a JSON object.
    pub fn to_record(&self) -> serde_json::Result<Record> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(record) => Ok(record),
            _ => Err(serde::ser::Error::custom("probe record is not a JSON object")),
        }
    }

    /// The write batch for one writer iteration: this record under [`PROBE_KEY`].
    ///
    /// # Errors
    /// Returns a serialization error if the record cannot be rendered.
    pub fn to_changes(&self) -> serde_json::Result<HashMap<StorageKey, Record>> {
        Ok(HashMap::from([(StorageKey::new(PROBE_KEY), self.to_record()?)]))
    }
}
