use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::collections::{from_unix_seconds, ReferenceUpsert};
use crate::error::Result;

/// One user entry of an export file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub handle: String,
    pub timestamp_seconds: i64,
}

/// Shape of a `string_list_data` entry. `href` is tolerated and ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    #[serde(default)]
    #[allow(dead_code)]
    href: Option<String>,
    value: String,
    timestamp: i64,
}

impl UserRecord {
    /// Parse and validate one fragment. The error is a human-readable reason.
    pub fn from_fragment(fragment: &[u8]) -> std::result::Result<Self, String> {
        let raw: RawEntry = serde_json::from_slice(fragment).map_err(|e| e.to_string())?;

        if raw.value.trim().is_empty() {
            return Err("empty `value` (handle)".to_string());
        }
        if raw.timestamp <= 0 {
            return Err(format!("`timestamp` must be positive, got {}", raw.timestamp));
        }
        if from_unix_seconds(raw.timestamp).is_err() {
            return Err(format!("`timestamp` {} is out of range", raw.timestamp));
        }

        Ok(Self {
            handle: raw.value,
            timestamp_seconds: raw.timestamp,
        })
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        from_unix_seconds(self.timestamp_seconds)
    }

    /// Reference collection upsert for this record, written at `updated`.
    pub fn to_upsert(&self, updated: DateTime<Utc>) -> Result<ReferenceUpsert> {
        Ok(ReferenceUpsert {
            user: self.handle.clone(),
            timestamp: self.timestamp()?,
            updated,
        })
    }
}
