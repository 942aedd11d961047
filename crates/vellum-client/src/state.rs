//! The in-memory working copy of the note collection.
//!
//! [`Workspace`] owns the notes, the preferences, the active-note pointer and
//! the [`ProtectionController`]. Every method is synchronous; callers share
//! it as `Arc<tokio::sync::Mutex<Workspace>>` (see [`crate::editor`]) so each
//! method call is one critical section.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use vellum_shared::{Cipher, Clock, NoteId};
use vellum_store::{Formatting, Note, Preferences};

use crate::error::{ProtectionError, Result};
use crate::events::ProtectionView;
use crate::protection::{
    NoteState, ProtectJob, ProtectionController, RekeyJob, Sealed, Ticket, UnlockJob, Unlocked,
};

pub struct Workspace {
    notes: Vec<Note>,
    preferences: Preferences,
    active: Option<NoteId>,
    protection: ProtectionController,
    clock: Arc<dyn Clock>,
    /// Fingerprint of the last snapshot written to the store.
    last_saved: Option<blake3::Hash>,
}

fn find_mut<'a>(notes: &'a mut [Note], id: &NoteId) -> Option<&'a mut Note> {
    notes.iter_mut().find(|n| &n.id == id)
}

impl Workspace {
    pub fn new(cipher: Cipher, clock: Arc<dyn Clock>) -> Self {
        Self {
            notes: Vec::new(),
            preferences: Preferences::default(),
            active: None,
            protection: ProtectionController::new(cipher),
            clock,
            last_saved: None,
        }
    }

    /// Replace the working copy with freshly loaded data. Every session and
    /// pending transition is dropped, so all protected notes start locked.
    pub fn load(&mut self, notes: Vec<Note>, preferences: Preferences) {
        self.protection.reset();
        self.notes = notes;
        self.preferences = preferences;
        self.active = None;
        self.last_saved = None;
        tracing::debug!(notes = self.notes.len(), "workspace loaded");
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Notes in display order: pinned first, then most recently updated.
    pub fn sorted_notes(&self) -> Vec<&Note> {
        let mut notes: Vec<&Note> = self.notes.iter().collect();
        notes.sort_by(|a, b| Note::display_order(a, b));
        notes
    }

    pub fn note(&self, id: &NoteId) -> Result<&Note> {
        self.notes
            .iter()
            .find(|n| &n.id == id)
            .ok_or_else(|| ProtectionError::NotFound(id.clone()))
    }

    fn note_mut(&mut self, id: &NoteId) -> Result<&mut Note> {
        find_mut(&mut self.notes, id).ok_or_else(|| ProtectionError::NotFound(id.clone()))
    }

    pub fn active(&self) -> Option<&NoteId> {
        self.active.as_ref()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
    }

    pub fn state(&self, id: &NoteId) -> Result<NoteState> {
        Ok(self.protection.state(self.note(id)?))
    }

    pub fn view(&self, id: &NoteId) -> Result<ProtectionView> {
        Ok(self.protection.view(self.note(id)?))
    }

    /// Content as the editor should show it: plaintext, or the working
    /// buffer of an unlocked note. `None` while locked.
    pub fn content(&self, id: &NoteId) -> Result<Option<String>> {
        let note = self.note(id)?;
        Ok(match note.plaintext() {
            Some(text) => Some(text.to_string()),
            None => self.protection.view(note).decrypted_content,
        })
    }

    /// Copy of the collection for persisting. A dirty session is committed
    /// first so the copy carries its latest ciphertext.
    /// If that commit fails the note keeps its previous ciphertext.
    pub fn snapshot_for_save(&mut self) -> (Vec<Note>, Preferences) {
        if let Some(id) = self.protection.session_note().cloned() {
            if let Some(note) = find_mut(&mut self.notes, &id) {
                if let Err(e) = self.protection.commit(note) {
                    tracing::error!(note_id = %id, error = %e, "could not commit session before save");
                }
            }
        }
        (self.notes.clone(), self.preferences.clone())
    }

    pub(crate) fn last_saved(&self) -> Option<blake3::Hash> {
        self.last_saved
    }

    pub(crate) fn mark_saved(&mut self, fingerprint: blake3::Hash) {
        self.last_saved = Some(fingerprint);
    }

    // ------------------------------------------------------------------
    // Note lifecycle
    // ------------------------------------------------------------------

    /// Create an unprotected note with the default formatting and make it
    /// the active note.
    pub fn create_note(&mut self, title: &str, content: &str) -> Result<NoteId> {
        let note = Note::new(
            title,
            content,
            self.preferences.default_formatting(),
            self.now(),
        );
        let id = note.id.clone();
        self.notes.push(note);
        self.select(&id)?;
        tracing::debug!(note_id = %id, "note created");
        Ok(id)
    }

    /// Make `id` the active note, locking the previous one first.
    pub fn select(&mut self, id: &NoteId) -> Result<()> {
        self.note(id)?;
        if self.active.as_ref() == Some(id) {
            return Ok(());
        }
        self.switch_away()?;
        self.active = Some(id.clone());
        Ok(())
    }

    /// Commit and close the open session, if any. Idempotent.
    pub fn switch_away(&mut self) -> Result<()> {
        if let Some(active) = self.active.clone() {
            if let Some(note) = find_mut(&mut self.notes, &active) {
                self.protection.switch_away(note)?;
            }
        }
        if let Some(id) = self.protection.session_note().cloned() {
            match find_mut(&mut self.notes, &id) {
                Some(note) => self.protection.switch_away(note)?,
                None => self.protection.discard(&id),
            }
        }
        Ok(())
    }

    /// Explicitly lock the open session.
    pub fn lock(&mut self) -> Result<()> {
        self.switch_away()
    }

    pub fn delete_note(&mut self, id: &NoteId) -> Result<Note> {
        if self.protection.is_in_flight(id) {
            return Err(ProtectionError::TransitionInProgress(id.clone()));
        }
        let index = self
            .notes
            .iter()
            .position(|n| &n.id == id)
            .ok_or_else(|| ProtectionError::NotFound(id.clone()))?;

        self.protection.discard(id);
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        tracing::info!(note_id = %id, "note deleted");
        Ok(self.notes.remove(index))
    }

    pub fn rename(&mut self, id: &NoteId, title: &str) -> Result<()> {
        let now = self.now();
        let note = self.note_mut(id)?;
        if note.title != title {
            note.title = title.to_string();
            note.updated_at = now;
        }
        Ok(())
    }

    pub fn set_pinned(&mut self, id: &NoteId, pinned: bool) -> Result<()> {
        self.note_mut(id)?.is_pinned = pinned;
        Ok(())
    }

    pub fn add_tag(&mut self, id: &NoteId, tag: &str) -> Result<bool> {
        Ok(self.note_mut(id)?.add_tag(tag))
    }

    pub fn remove_tag(&mut self, id: &NoteId, tag: &str) -> Result<bool> {
        Ok(self.note_mut(id)?.remove_tag(tag))
    }

    pub fn set_formatting(&mut self, id: &NoteId, formatting: Formatting) -> Result<()> {
        self.note_mut(id)?.formatting = formatting;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Content and protection
    // ------------------------------------------------------------------

    /// Edit content: plaintext for unprotected notes, the working buffer
    /// for the unlocked one.
    pub fn edit(&mut self, id: &NoteId, content: &str) -> Result<bool> {
        let now = self.now();
        let note = find_mut(&mut self.notes, id).ok_or_else(|| ProtectionError::NotFound(id.clone()))?;
        self.protection.edit(note, content, now)
    }

    pub fn commit(&mut self, id: &NoteId) -> Result<bool> {
        let note = find_mut(&mut self.notes, id).ok_or_else(|| ProtectionError::NotFound(id.clone()))?;
        self.protection.commit(note)
    }

    pub fn unprotect(&mut self, id: &NoteId) -> Result<NoteState> {
        let now = self.now();
        let note = find_mut(&mut self.notes, id).ok_or_else(|| ProtectionError::NotFound(id.clone()))?;
        self.protection.unprotect(note, now)
    }

    pub fn begin_protect(&mut self, id: &NoteId, password: &str) -> Result<ProtectJob> {
        let note = self.note(id)?.clone();
        self.protection.begin_protect(&note, password)
    }

    pub fn finish_protect(&mut self, ticket: &Ticket, result: Result<Sealed>) -> Result<NoteState> {
        let now = self.now();
        let Some(note) = find_mut(&mut self.notes, ticket.note_id()) else {
            self.protection.abandon(ticket);
            return Err(ProtectionError::NotFound(ticket.note_id().clone()));
        };
        self.protection.finish_protect(note, ticket, result, now)
    }

    /// Selects the note, then prepares the unlock.
    pub fn begin_unlock(&mut self, id: &NoteId, password: &str) -> Result<UnlockJob> {
        self.select(id)?;
        let note = self.note(id)?.clone();
        self.protection.begin_unlock(&note, password)
    }

    /// Open the session, unless the user moved to another note while the
    /// key was being derived.
    pub fn finish_unlock(&mut self, ticket: &Ticket, result: Result<Unlocked>) -> Result<NoteState> {
        let id = ticket.note_id().clone();
        if self.active.as_ref() != Some(&id) {
            self.protection.abandon(ticket);
            tracing::debug!(note_id = %id, "unlock finished after switch; discarded");
            return Err(ProtectionError::Superseded(id));
        }
        if result.is_ok() {
            self.switch_away_other(&id)?;
        }

        let now = self.now();
        let Some(note) = find_mut(&mut self.notes, &id) else {
            self.protection.abandon(ticket);
            return Err(ProtectionError::NotFound(id));
        };
        self.protection.finish_unlock(note, ticket, result, now)
    }

    fn switch_away_other(&mut self, keep: &NoteId) -> Result<()> {
        if let Some(open) = self.protection.session_note().cloned() {
            if &open != keep {
                match find_mut(&mut self.notes, &open) {
                    Some(note) => self.protection.switch_away(note)?,
                    None => self.protection.discard(&open),
                }
            }
        }
        Ok(())
    }

    pub fn begin_change_password(&mut self, id: &NoteId, new_password: &str) -> Result<RekeyJob> {
        let note = self.note(id)?.clone();
        self.protection.begin_change_password(&note, new_password)
    }

    pub fn begin_change_password_with_current(
        &mut self,
        id: &NoteId,
        current: &str,
        new_password: &str,
    ) -> Result<RekeyJob> {
        let note = self.note(id)?.clone();
        self.protection
            .begin_change_password_with_current(&note, current, new_password)
    }

    pub fn finish_change_password(
        &mut self,
        ticket: &Ticket,
        result: Result<Sealed>,
    ) -> Result<NoteState> {
        let now = self.now();
        let Some(note) = find_mut(&mut self.notes, ticket.note_id()) else {
            self.protection.abandon(ticket);
            return Err(ProtectionError::NotFound(ticket.note_id().clone()));
        };
        self.protection.finish_change_password(note, ticket, result, now)
    }
}
