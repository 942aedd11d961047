//! Versioned snapshot format and its upgrade path.
//!
//! Shipped versions:
//!
//! | version | shape |
//! |---|---|
//! | `0`     | bare JSON array of notes, no preferences |
//! | `1.0.0` | `{notes, preferences, version}`; notes may carry the `isUnlocked` session flag, lack `formatting`, hold non-string content or tags |
//! | `2.0.0` | current: normalized notes, session fields never written |
//!
//! Migrations run in order on the raw JSON value, upgrade only.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use vellum_shared::constants::SNAPSHOT_VERSION;

use crate::error::{Result, StoreError};
use crate::models::{Note, NoteRecord, Preferences};

const EPOCH: &str = "1970-01-01T00:00:00Z";

/// Borrowed snapshot used when writing.
#[derive(Debug, Serialize)]
pub struct SnapshotRef<'a> {
    pub notes: &'a [Note],
    pub preferences: &'a Preferences,
    pub version: &'a str,
}

/// Snapshot read back and brought up to the current version. Notes are still
/// raw so callers can choose how strictly to validate them.
#[derive(Debug, Deserialize)]
pub struct RawSnapshot {
    #[serde(default)]
    pub notes: Vec<Value>,
    #[serde(default)]
    pub preferences: Option<Value>,
    pub version: String,
}

/// Outcome of [`migrate`].
#[derive(Debug)]
pub struct Migrated {
    pub snapshot: RawSnapshot,
    pub from_version: String,
}

impl Migrated {
    pub fn was_upgraded(&self) -> bool {
        self.from_version != SNAPSHOT_VERSION
    }
}

/// Identify the version of a stored payload.
pub fn detect_version(value: &Value) -> Result<String> {
    match value {
        Value::Array(_) => Ok("0".to_string()),
        Value::Object(map) => match map.get("version") {
            Some(Value::String(v)) => Ok(v.clone()),
            None => Ok("1.0.0".to_string()),
            Some(other) => Err(StoreError::CorruptSnapshot(format!(
                "version field is not a string: {other}"
            ))),
        },
        _ => Err(StoreError::CorruptSnapshot(
            "payload is neither an object nor an array".into(),
        )),
    }
}

/// Upgrade `value` to the current snapshot version.
pub fn migrate(mut value: Value) -> Result<Migrated> {
    let from_version = detect_version(&value)?;
    let mut version = from_version.clone();

    loop {
        match version.as_str() {
            "0" => {
                value = v0_to_v1(value);
                version = "1.0.0".into();
            }
            "1.0.0" => {
                value = v1_to_v2(value)?;
                version = "2.0.0".into();
            }
            SNAPSHOT_VERSION => break,
            other => return Err(StoreError::UnsupportedVersion(other.to_string())),
        }
        tracing::debug!(to = %version, "applied snapshot migration step");
    }

    let snapshot: RawSnapshot =
        serde_json::from_value(value).map_err(|e| StoreError::CorruptSnapshot(e.to_string()))?;

    Ok(Migrated {
        snapshot,
        from_version,
    })
}

fn v0_to_v1(value: Value) -> Value {
    json!({
        "notes": value,
        "preferences": {},
        "version": "1.0.0",
    })
}

fn v1_to_v2(value: Value) -> Result<Value> {
    let Value::Object(mut map) = value else {
        return Err(StoreError::CorruptSnapshot("v1 snapshot is not an object".into()));
    };

    let notes = match map.remove("notes") {
        Some(Value::Array(notes)) => notes,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(StoreError::CorruptSnapshot("notes is not an array".into()));
        }
    };

    let notes = notes
        .into_iter()
        .map(|note| match note {
            Value::Object(obj) => Value::Object(normalize_v1_note(obj)),
            other => other,
        })
        .collect();

    map.insert("notes".into(), Value::Array(notes));
    map.insert("version".into(), Value::String("2.0.0".into()));
    Ok(Value::Object(map))
}

fn normalize_v1_note(mut note: Map<String, Value>) -> Map<String, Value> {
    note.remove("isUnlocked");

    if let Some(Value::Number(n)) = note.get("id") {
        let id = n.to_string();
        note.insert("id".into(), Value::String(id));
    }

    if !matches!(note.get("content"), Some(Value::String(_))) {
        note.insert("content".into(), Value::String(String::new()));
    }

    let tags: Vec<Value> = match note.remove("tags") {
        Some(Value::Array(tags)) => {
            let mut seen = HashSet::new();
            tags.into_iter()
                .filter_map(|t| match t {
                    Value::String(s) if seen.insert(s.clone()) => Some(Value::String(s)),
                    _ => None,
                })
                .collect()
        }
        _ => Vec::new(),
    };
    note.insert("tags".into(), Value::Array(tags));

    if !matches!(note.get("formatting"), Some(Value::Object(_))) {
        note.insert(
            "formatting".into(),
            json!({ "fontSize": "medium", "alignment": "left" }),
        );
    }

    let updated = note
        .get("updatedAt")
        .filter(|v| v.is_string())
        .cloned()
        .unwrap_or_else(|| Value::String(EPOCH.into()));
    if !note.get("createdAt").is_some_and(Value::is_string) {
        note.insert("createdAt".into(), updated.clone());
    }
    note.insert("updatedAt".into(), updated);

    if !note.get("isPasswordProtected").is_some_and(Value::is_boolean) {
        note.insert("isPasswordProtected".into(), Value::Bool(false));
    }

    note
}

/// How to treat notes that fail to parse or break the protection invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Skip bad notes with a warning (loading the working copy).
    Lenient,
    /// Reject the whole payload (restoring a backup).
    Strict,
}

/// Turn raw note values into [`Note`]s.
pub fn parse_notes(values: Vec<Value>, validation: Validation) -> Result<Vec<Note>> {
    let mut notes = Vec::with_capacity(values.len());
    let mut ids = HashSet::new();

    for (index, value) in values.into_iter().enumerate() {
        let record = match serde_json::from_value::<NoteRecord>(value) {
            Ok(record) => record,
            Err(e) => match validation {
                Validation::Strict => {
                    return Err(StoreError::MalformedBackup(format!("note #{index}: {e}")));
                }
                Validation::Lenient => {
                    tracing::warn!(index, error = %e, "skipping unreadable note");
                    continue;
                }
            },
        };

        if validation == Validation::Strict {
            record
                .check_protection_fields()
                .map_err(StoreError::MalformedBackup)?;
            if !ids.insert(record.id.clone()) {
                return Err(StoreError::MalformedBackup(format!(
                    "duplicate note id {}",
                    record.id
                )));
            }
        } else {
            if !ids.insert(record.id.clone()) {
                tracing::warn!(note_id = %record.id, index, "skipping note with duplicate id");
                continue;
            }
            if let Err(problem) = record.check_protection_fields() {
                tracing::warn!(note_id = %record.id, %problem, "note protection fields inconsistent");
            }
        }

        notes.push(Note::from(record));
    }

    Ok(notes)
}
