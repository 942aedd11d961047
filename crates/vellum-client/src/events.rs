use serde::Serialize;
use vellum_store::StoreErrorKind;

/// What a UI needs to render a note's protection controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionView {
    pub is_unlocked: bool,
    /// Message from the last failed unlock of this note.
    pub unlock_error: Option<String>,
    /// Working buffer, present only while unlocked.
    pub decrypted_content: Option<String>,
}

/// Outcome of one autosave attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveEvent {
    Saved { notes: usize, size: usize },
    /// Nothing changed since the last successful save.
    Skipped,
    SaveFailed { kind: StoreErrorKind, message: String },
}

impl AutosaveEvent {
    pub fn is_saved(&self) -> bool {
        matches!(self, AutosaveEvent::Saved { .. })
    }
}
