//! Domain model structs persisted in the snapshot.
//!
//! [`Note`] keeps plaintext and ciphertext in a single [`NoteBody`] enum so
//! the two can never both be authoritative. On the wire it is flattened into
//! the [`NoteRecord`] shape (`content`, `isPasswordProtected`,
//! `passwordHash`, `encryptedContent`).

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vellum_shared::constants::{
    DEFAULT_AUTOSAVE_INTERVAL_SECS, MAX_AUTOSAVE_INTERVAL_SECS, MIN_AUTOSAVE_INTERVAL_SECS,
};
use vellum_shared::NoteId;

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formatting {
    pub font_size: FontSize,
    pub alignment: Alignment,
}

// ---------------------------------------------------------------------------
// Note
// ---------------------------------------------------------------------------

/// Where a note's content lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteBody {
    /// Plaintext is authoritative.
    Plain { content: String },
    /// Only the verifier and the ciphertext are stored.
    Protected {
        password_hash: String,
        encrypted_content: String,
    },
}

impl NoteBody {
    pub fn is_protected(&self) -> bool {
        matches!(self, NoteBody::Protected { .. })
    }
}

/// A single note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "NoteRecord", into = "NoteRecord")]
pub struct Note {
    /// Stable identifier, never changes after creation.
    pub id: NoteId,
    pub title: String,
    pub body: NoteBody,
    pub created_at: DateTime<Utc>,
    /// Bumped on every content change.
    pub updated_at: DateTime<Utc>,
    /// Last successful unlock, for protected notes.
    pub last_unlocked_at: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    pub tags: BTreeSet<String>,
    pub formatting: Formatting,
}

impl Note {
    /// Create an unprotected note.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        formatting: Formatting,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NoteId::new(),
            title: title.into(),
            body: NoteBody::Plain {
                content: content.into(),
            },
            created_at: now,
            updated_at: now,
            last_unlocked_at: None,
            is_pinned: false,
            tags: BTreeSet::new(),
            formatting,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.body.is_protected()
    }

    /// Plaintext content, or `None` while protected.
    pub fn plaintext(&self) -> Option<&str> {
        match &self.body {
            NoteBody::Plain { content } => Some(content),
            NoteBody::Protected { .. } => None,
        }
    }

    /// Add a tag. Empty and duplicate tags are ignored.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() {
            return false;
        }
        self.tags.insert(tag.to_string())
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag.trim())
    }

    /// Display order: pinned first, then most recently updated.
    pub fn display_order(a: &Note, b: &Note) -> std::cmp::Ordering {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    }
}

/// Flat wire shape of a [`Note`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub id: NoteId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_password_protected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub formatting: Formatting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unlocked_at: Option<DateTime<Utc>>,
}

impl NoteRecord {
    /// Check that exactly one content representation is present.
    pub fn check_protection_fields(&self) -> Result<(), String> {
        let has_hash = self.password_hash.as_deref().is_some_and(|h| !h.is_empty());
        let has_blob = self
            .encrypted_content
            .as_deref()
            .is_some_and(|c| !c.is_empty());

        if self.is_password_protected {
            if !has_hash || !has_blob {
                return Err(format!(
                    "note {} is protected but lacks its password hash or ciphertext",
                    self.id
                ));
            }
            if !self.content.is_empty() {
                return Err(format!("note {} is protected but carries plaintext", self.id));
            }
        } else if self.password_hash.is_some() || self.encrypted_content.is_some() {
            return Err(format!(
                "note {} is unprotected but carries protection data",
                self.id
            ));
        }
        Ok(())
    }
}

impl From<NoteRecord> for Note {
    fn from(record: NoteRecord) -> Self {
        let body = if record.is_password_protected {
            if !record.content.is_empty() {
                tracing::warn!(
                    note_id = %record.id,
                    "dropping stray plaintext on protected note"
                );
            }
            NoteBody::Protected {
                password_hash: record.password_hash.unwrap_or_default(),
                encrypted_content: record.encrypted_content.unwrap_or_default(),
            }
        } else {
            NoteBody::Plain {
                content: record.content,
            }
        };

        Self {
            id: record.id,
            title: record.title,
            body,
            created_at: record.created_at,
            updated_at: record.updated_at,
            last_unlocked_at: record.last_unlocked_at,
            is_pinned: record.is_pinned,
            tags: record
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            formatting: record.formatting,
        }
    }
}

impl From<Note> for NoteRecord {
    fn from(note: Note) -> Self {
        let (content, is_password_protected, password_hash, encrypted_content) = match note.body
        {
            NoteBody::Plain { content } => (content, false, None, None),
            NoteBody::Protected {
                password_hash,
                encrypted_content,
            } => (String::new(), true, Some(password_hash), Some(encrypted_content)),
        };

        Self {
            id: note.id,
            title: note.title,
            content,
            created_at: note.created_at,
            updated_at: note.updated_at,
            is_pinned: note.is_pinned,
            is_password_protected,
            password_hash,
            encrypted_content,
            tags: note.tags.into_iter().collect(),
            formatting: note.formatting,
            last_unlocked_at: note.last_unlocked_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// User preferences. Missing fields read back as their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme: Theme,
    pub auto_save: bool,
    /// Seconds between autosave ticks.
    pub auto_save_interval: u64,
    pub default_font_size: FontSize,
    pub default_alignment: Alignment,
    pub show_line_numbers: bool,
    pub word_wrap: bool,
    pub spell_check: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            auto_save: true,
            auto_save_interval: DEFAULT_AUTOSAVE_INTERVAL_SECS,
            default_font_size: FontSize::Medium,
            default_alignment: Alignment::Left,
            show_line_numbers: false,
            word_wrap: true,
            spell_check: true,
            last_backup: None,
        }
    }
}

impl Preferences {
    /// Autosave period, clamped to the supported range.
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(
            self.auto_save_interval
                .clamp(MIN_AUTOSAVE_INTERVAL_SECS, MAX_AUTOSAVE_INTERVAL_SECS),
        )
    }

    /// Formatting applied to newly created notes.
    pub fn default_formatting(&self) -> Formatting {
        Formatting {
            font_size: self.default_font_size,
            alignment: self.default_alignment,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage info
// ---------------------------------------------------------------------------

/// Approximate usage of the backing medium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageInfo {
    pub used: usize,
    pub available: usize,
    pub percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_plain_note_wire_shape() {
        let mut note = Note::new(
            "Groceries",
            "milk",
            Formatting::default(),
            ts("2024-03-01T10:00:00Z"),
        );
        note.add_tag("home");

        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["content"], "milk");
        assert_eq!(json["isPasswordProtected"], false);
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("encryptedContent").is_none());
        assert_eq!(json["formatting"]["fontSize"], "medium");
        assert_eq!(json["tags"], serde_json::json!(["home"]));
    }

    #[test]
    fn test_protected_note_never_serializes_plaintext() {
        let mut note = Note::new("Diary", "", Formatting::default(), ts("2024-03-01T10:00:00Z"));
        note.body = NoteBody::Protected {
            password_hash: "v1$...".into(),
            encrypted_content: "AAAA".into(),
        };

        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["content"], "");
        assert_eq!(json["isPasswordProtected"], true);
        assert_eq!(json["encryptedContent"], "AAAA");

        let back: Note = serde_json::from_value(json).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn test_session_flag_is_ignored_on_read() {
        let json = serde_json::json!({
            "id": "1",
            "title": "t",
            "content": "",
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-01T10:00:00Z",
            "isPasswordProtected": true,
            "passwordHash": "h",
            "encryptedContent": "c",
            "isUnlocked": true,
        });
        let note: Note = serde_json::from_value(json).unwrap();
        assert!(note.is_protected());
        assert!(note.plaintext().is_none());
    }

    #[test]
    fn test_protected_record_with_plaintext_drops_plaintext() {
        let record = NoteRecord {
            id: NoteId::from("n"),
            title: String::new(),
            content: "leak".into(),
            created_at: ts("2024-03-01T10:00:00Z"),
            updated_at: ts("2024-03-01T10:00:00Z"),
            is_pinned: false,
            is_password_protected: true,
            password_hash: Some("h".into()),
            encrypted_content: Some("c".into()),
            tags: vec![],
            formatting: Formatting::default(),
            last_unlocked_at: None,
        };
        assert!(record.check_protection_fields().is_err());

        let note = Note::from(record);
        let wire = NoteRecord::from(note);
        assert_eq!(wire.content, "");
    }

    #[test]
    fn test_tags_are_unique_and_trimmed() {
        let mut note = Note::new("t", "", Formatting::default(), ts("2024-03-01T10:00:00Z"));
        assert!(note.add_tag("work"));
        assert!(!note.add_tag(" work "));
        assert!(!note.add_tag("   "));
        assert_eq!(note.tags.len(), 1);
        assert!(note.remove_tag("work"));
    }

    #[test]
    fn test_display_order_pins_first_then_recent() {
        let mut a = Note::new("a", "", Formatting::default(), ts("2024-03-01T10:00:00Z"));
        let b = Note::new("b", "", Formatting::default(), ts("2024-03-02T10:00:00Z"));
        let mut notes = vec![a.clone(), b.clone()];
        notes.sort_by(Note::display_order);
        assert_eq!(notes[0].id, b.id);

        a.is_pinned = true;
        let mut notes = vec![b, a.clone()];
        notes.sort_by(Note::display_order);
        assert_eq!(notes[0].id, a.id);
    }

    #[test]
    fn test_preferences_fill_missing_fields_with_defaults() {
        let prefs: Preferences =
            serde_json::from_str(r#"{"theme":"dark","autoSaveInterval":5}"#).unwrap();
        assert_eq!(prefs.theme, Theme::Dark);
        assert!(prefs.auto_save);
        assert!(prefs.word_wrap);
        assert_eq!(prefs.autosave_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_autosave_interval_clamped_high() {
        let prefs = Preferences {
            auto_save_interval: 10_000,
            ..Preferences::default()
        };
        assert_eq!(prefs.autosave_interval(), Duration::from_secs(300));
    }
}
