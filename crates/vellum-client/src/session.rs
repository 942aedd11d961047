//! The single live decrypted view of a protected note.

use std::fmt;

use vellum_shared::{NoteId, SessionKey};
use zeroize::Zeroizing;

/// Working buffer plus the key material needed to re-seal it. Both are
/// wiped when the session is dropped.
pub struct ProtectionSession {
    note_id: NoteId,
    buffer: Zeroizing<String>,
    key: SessionKey,
    dirty: bool,
}

impl ProtectionSession {
    pub fn new(note_id: NoteId, buffer: Zeroizing<String>, key: SessionKey) -> Self {
        Self {
            note_id,
            buffer,
            key,
            dirty: false,
        }
    }

    pub fn note_id(&self) -> &NoteId {
        &self.note_id
    }

    pub fn content(&self) -> &str {
        &self.buffer
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Buffer differs from the note's stored ciphertext.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn edit(&mut self, content: &str) -> bool {
        if self.buffer.as_str() == content {
            return false;
        }
        self.buffer = Zeroizing::new(content.to_string());
        self.dirty = true;
        true
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Swap in key material for a new password. The old key is wiped.
    pub fn rekey(&mut self, key: SessionKey) {
        self.key = key;
    }

    /// Hand out the buffer, consuming the session.
    pub fn into_content(self) -> Zeroizing<String> {
        self.buffer
    }
}

impl fmt::Debug for ProtectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectionSession")
            .field("note_id", &self.note_id)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
