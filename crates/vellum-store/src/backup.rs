use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::models::{Note, Preferences};
use crate::snapshot::{self, Validation};

/// Full backup payload: the snapshot plus the time it was taken. Protected
/// notes carry only their ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub notes: Vec<Note>,
    pub preferences: Preferences,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// A backup that parsed, migrated and passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedBackup {
    pub notes: Vec<Note>,
    pub preferences: Option<Preferences>,
    pub source_version: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parse a serialized backup. Any problem is reported as
/// [`StoreError::MalformedBackup`].
pub fn parse_backup(json: &str) -> Result<ValidatedBackup> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| StoreError::MalformedBackup(e.to_string()))?;

    if !value.is_object() || value.get("notes").map_or(true, |n| !n.is_array()) {
        return Err(StoreError::MalformedBackup(
            "expected an object with a notes array".into(),
        ));
    }

    let timestamp = value
        .get("timestamp")
        .and_then(|t| t.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    let migrated = snapshot::migrate(value).map_err(|e| match e {
        StoreError::MalformedBackup(_) => e,
        other => StoreError::MalformedBackup(other.to_string()),
    })?;

    let preferences = match migrated.snapshot.preferences {
        Some(serde_json::Value::Null) | None => None,
        Some(value) => Some(
            serde_json::from_value(value)
                .map_err(|e| StoreError::MalformedBackup(format!("preferences: {e}")))?,
        ),
    };

    let notes = snapshot::parse_notes(migrated.snapshot.notes, Validation::Strict)?;

    Ok(ValidatedBackup {
        notes,
        preferences,
        source_version: migrated.from_version,
        timestamp,
    })
}

/// Counts reported after a successful restore.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStats {
    pub notes_restored: usize,
    pub protected_notes: usize,
    pub preferences_restored: bool,
}
