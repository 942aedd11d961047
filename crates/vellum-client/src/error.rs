use thiserror::Error;
use vellum_shared::{CryptoError, NoteId};
use vellum_store::StoreError;

use crate::protection::NoteState;

/// Errors surfaced by the protection state machine and the workspace.
#[derive(Error, Debug)]
pub enum ProtectionError {
    /// The password did not match. The note stays locked.
    #[error("Incorrect password")]
    WrongPassword,

    /// Stored verifier or ciphertext is missing or unreadable. Scoped to the
    /// one note.
    #[error("Protection data of note {note_id} is corrupt: {reason}")]
    CorruptProtectionState { note_id: NoteId, reason: String },

    /// Decryption failed for a reason other than a wrong key.
    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    /// The note is protected and has no open session.
    #[error("Note {0} is locked")]
    Locked(NoteId),

    #[error("Note {0} not found")]
    NotFound(NoteId),

    /// A protect / unlock / password change is already running for the note.
    #[error("A protection change is already in progress for note {0}")]
    TransitionInProgress(NoteId),

    #[error("Operation not allowed on note {note_id} while {state}")]
    InvalidState { note_id: NoteId, state: NoteState },

    /// A background result arrived after the note stopped being the
    /// active one, or after the workspace was reloaded. It was dropped.
    #[error("Result for note {0} discarded")]
    Superseded(NoteId),

    #[error(transparent)]
    Cipher(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Internal(String),
}

impl ProtectionError {
    pub(crate) fn corrupt(note_id: &NoteId, reason: impl ToString) -> Self {
        ProtectionError::CorruptProtectionState {
            note_id: note_id.clone(),
            reason: reason.to_string(),
        }
    }

    /// Whether the user can simply try again (another password, later).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtectionError::WrongPassword
                | ProtectionError::PasswordTooShort { .. }
                | ProtectionError::TransitionInProgress(_)
                | ProtectionError::Locked(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtectionError>;
