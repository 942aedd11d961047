//! Per-note protection state machine.
//!
//! A note is in one of three states:
//!
//! ```text
//!   Unprotected --protect--> ProtectedLocked --unlock--> ProtectedUnlocked
//!        ^                                                  |   |
//!        +--------------------- unprotect ------------------+   |
//!                             ProtectedLocked <-- switch_away / lock
//! ```
//!
//! `ProtectedUnlocked` exists for at most one note at a time: the controller
//! owns the only [`ProtectionSession`]. Whether a note is unlocked is never
//! stored on the note itself, so every freshly loaded protected note starts
//! locked.
//!
//! Transitions that need key derivation are split in two. `begin_*` checks
//! preconditions, marks the note in flight and returns a [`Transition`] job;
//! the job's blocking `run` happens elsewhere; `finish_*` applies the result
//! in one step. While a note is in flight, edits and further transitions on
//! it are refused.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vellum_shared::constants::MIN_PASSWORD_LEN;
use vellum_shared::{Cipher, CryptoError, NoteId, PasswordArtifact, SessionKey};
use vellum_store::{Note, NoteBody};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{ProtectionError, Result};
use crate::events::ProtectionView;
use crate::session::ProtectionSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteState {
    Unprotected,
    ProtectedLocked,
    ProtectedUnlocked,
}

impl fmt::Display for NoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NoteState::Unprotected => "unprotected",
            NoteState::ProtectedLocked => "locked",
            NoteState::ProtectedUnlocked => "unlocked",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Background jobs
// ---------------------------------------------------------------------------

/// Receipt for a transition in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    note_id: NoteId,
    epoch: u64,
}

impl Ticket {
    pub fn note_id(&self) -> &NoteId {
        &self.note_id
    }
}

/// Key-derivation half of a transition.
pub trait Transition: Send + 'static {
    type Output: Send + 'static;

    fn ticket(&self) -> &Ticket;

    /// Blocking; keep it off the async executor.
    fn run(self) -> Result<Self::Output>;
}

/// Fresh verifier and ciphertext under a new password.
pub struct Sealed {
    password_hash: String,
    encrypted_content: String,
    key: SessionKey,
}

/// Decrypted content plus the key it was opened with.
pub struct Unlocked {
    content: Zeroizing<String>,
    key: SessionKey,
}

pub struct ProtectJob {
    ticket: Ticket,
    plaintext: Zeroizing<String>,
    password: Zeroizing<String>,
    cipher: Cipher,
}

impl Transition for ProtectJob {
    type Output = Sealed;

    fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    fn run(self) -> Result<Sealed> {
        seal_new(&self.cipher, &self.plaintext, &self.password)
    }
}

pub struct UnlockJob {
    ticket: Ticket,
    password_hash: String,
    encrypted_content: String,
    password: Zeroizing<String>,
    cipher: Cipher,
}

impl Transition for UnlockJob {
    type Output = Unlocked;

    fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    fn run(self) -> Result<Unlocked> {
        open_stored(
            &self.cipher,
            &self.ticket.note_id,
            &self.password_hash,
            &self.encrypted_content,
            &self.password,
        )
    }
}

enum RekeySource {
    /// Working buffer of the open session.
    Buffer(Zeroizing<String>),
    /// Stored data, opened with the caller-supplied current password.
    Stored {
        password_hash: String,
        encrypted_content: String,
        current: Zeroizing<String>,
    },
}

pub struct RekeyJob {
    ticket: Ticket,
    source: RekeySource,
    new_password: Zeroizing<String>,
    cipher: Cipher,
}

impl Transition for RekeyJob {
    type Output = Sealed;

    fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    fn run(self) -> Result<Sealed> {
        let plaintext = match self.source {
            RekeySource::Buffer(buffer) => buffer,
            RekeySource::Stored {
                password_hash,
                encrypted_content,
                current,
            } => {
                open_stored(
                    &self.cipher,
                    &self.ticket.note_id,
                    &password_hash,
                    &encrypted_content,
                    &current,
                )?
                .content
            }
        };
        seal_new(&self.cipher, &plaintext, &self.new_password)
    }
}

fn seal_new(cipher: &Cipher, plaintext: &str, password: &str) -> Result<Sealed> {
    let artifact = cipher.derive_verifier(password)?;
    let key = cipher.derive_key(password)?;
    let encrypted_content = cipher.seal(&key, plaintext)?;
    Ok(Sealed {
        password_hash: artifact.to_string(),
        encrypted_content,
        key,
    })
}

fn open_stored(
    cipher: &Cipher,
    note_id: &NoteId,
    password_hash: &str,
    encrypted_content: &str,
    password: &str,
) -> Result<Unlocked> {
    let artifact =
        PasswordArtifact::from_str(password_hash).map_err(|e| ProtectionError::corrupt(note_id, e))?;
    if !cipher.verify(password, &artifact) {
        return Err(ProtectionError::WrongPassword);
    }

    let (content, key) = cipher
        .open(encrypted_content, password)
        .map_err(|e| classify_open_error(note_id, e))?;
    Ok(Unlocked { content, key })
}

/// A verified password whose key still fails authentication reads as a
/// wrong password; unreadable blobs are corruption.
fn classify_open_error(note_id: &NoteId, e: CryptoError) -> ProtectionError {
    if e.is_structural() {
        return ProtectionError::corrupt(note_id, e);
    }
    match e {
        CryptoError::DecryptionFailed => ProtectionError::WrongPassword,
        other => ProtectionError::DecryptionError(other.to_string()),
    }
}

fn check_new_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ProtectionError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owner of the one protection session and of the in-flight set.
#[derive(Debug)]
pub struct ProtectionController {
    cipher: Cipher,
    session: Option<ProtectionSession>,
    in_flight: HashSet<NoteId>,
    unlock_error: Option<(NoteId, String)>,
    /// Bumped on reset so results started before it are dropped.
    epoch: u64,
}

impl ProtectionController {
    pub fn new(cipher: Cipher) -> Self {
        Self {
            cipher,
            session: None,
            in_flight: HashSet::new(),
            unlock_error: None,
            epoch: 0,
        }
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Note whose session is open, if any.
    pub fn session_note(&self) -> Option<&NoteId> {
        self.session.as_ref().map(ProtectionSession::note_id)
    }

    pub fn is_in_flight(&self, note_id: &NoteId) -> bool {
        self.in_flight.contains(note_id)
    }

    pub fn state(&self, note: &Note) -> NoteState {
        if !note.is_protected() {
            NoteState::Unprotected
        } else if self.is_open(&note.id) {
            NoteState::ProtectedUnlocked
        } else {
            NoteState::ProtectedLocked
        }
    }

    pub fn view(&self, note: &Note) -> ProtectionView {
        let session = self.session.as_ref().filter(|s| s.note_id() == &note.id);
        ProtectionView {
            is_unlocked: session.is_some(),
            unlock_error: self
                .unlock_error
                .as_ref()
                .filter(|(id, _)| id == &note.id)
                .map(|(_, msg)| msg.clone()),
            decrypted_content: session.map(|s| s.content().to_string()),
        }
    }

    fn is_open(&self, note_id: &NoteId) -> bool {
        self.session_note() == Some(note_id)
    }

    fn ensure_idle(&self, note_id: &NoteId) -> Result<()> {
        if self.in_flight.contains(note_id) {
            return Err(ProtectionError::TransitionInProgress(note_id.clone()));
        }
        Ok(())
    }

    fn issue(&mut self, note_id: &NoteId) -> Ticket {
        self.in_flight.insert(note_id.clone());
        Ticket {
            note_id: note_id.clone(),
            epoch: self.epoch,
        }
    }

    fn settle(&mut self, ticket: &Ticket) -> Result<()> {
        if ticket.epoch != self.epoch {
            return Err(ProtectionError::Superseded(ticket.note_id.clone()));
        }
        self.in_flight.remove(&ticket.note_id);
        Ok(())
    }

    /// Release a ticket whose result will not be applied.
    pub fn abandon(&mut self, ticket: &Ticket) {
        if ticket.epoch == self.epoch {
            self.in_flight.remove(&ticket.note_id);
        }
    }

    fn invalid(&self, note: &Note) -> ProtectionError {
        ProtectionError::InvalidState {
            note_id: note.id.clone(),
            state: self.state(note),
        }
    }

    // -- protect ----------------------------------------------------------

    pub fn begin_protect(&mut self, note: &Note, password: &str) -> Result<ProtectJob> {
        self.ensure_idle(&note.id)?;
        check_new_password(password)?;
        let NoteBody::Plain { content } = &note.body else {
            return Err(self.invalid(note));
        };

        Ok(ProtectJob {
            plaintext: Zeroizing::new(content.clone()),
            password: Zeroizing::new(password.to_string()),
            cipher: self.cipher.clone(),
            ticket: self.issue(&note.id),
        })
    }

    pub fn finish_protect(
        &mut self,
        note: &mut Note,
        ticket: &Ticket,
        result: Result<Sealed>,
        now: DateTime<Utc>,
    ) -> Result<NoteState> {
        self.settle(ticket)?;
        let sealed = result?;

        if let NoteBody::Plain { content } = &mut note.body {
            content.zeroize();
        }
        note.body = NoteBody::Protected {
            password_hash: sealed.password_hash,
            encrypted_content: sealed.encrypted_content,
        };
        note.updated_at = now;

        tracing::info!(note_id = %note.id, "note protected");
        Ok(NoteState::ProtectedLocked)
    }

    // -- unlock -----------------------------------------------------------

    pub fn begin_unlock(&mut self, note: &Note, password: &str) -> Result<UnlockJob> {
        self.ensure_idle(&note.id)?;
        let NoteBody::Protected {
            password_hash,
            encrypted_content,
        } = &note.body
        else {
            return Err(self.invalid(note));
        };
        if self.is_open(&note.id) {
            return Err(self.invalid(note));
        }
        if password.is_empty() {
            self.unlock_error = Some((note.id.clone(), "Password required".into()));
            return Err(ProtectionError::WrongPassword);
        }

        Ok(UnlockJob {
            password_hash: password_hash.clone(),
            encrypted_content: encrypted_content.clone(),
            password: Zeroizing::new(password.to_string()),
            cipher: self.cipher.clone(),
            ticket: self.issue(&note.id),
        })
    }

    /// Open the session. Any previously open session must already be
    /// closed with [`ProtectionController::switch_away`].
    pub fn finish_unlock(
        &mut self,
        note: &mut Note,
        ticket: &Ticket,
        result: Result<Unlocked>,
        now: DateTime<Utc>,
    ) -> Result<NoteState> {
        self.settle(ticket)?;

        let unlocked = match result {
            Ok(unlocked) => unlocked,
            Err(e) => {
                if matches!(
                    e,
                    ProtectionError::WrongPassword | ProtectionError::CorruptProtectionState { .. }
                ) {
                    self.unlock_error = Some((note.id.clone(), e.to_string()));
                }
                tracing::warn!(note_id = %note.id, error = %e, "unlock failed");
                return Err(e);
            }
        };

        if let Some(open) = self.session_note() {
            return Err(ProtectionError::Internal(format!(
                "session for note {open} still open"
            )));
        }

        note.last_unlocked_at = Some(now);
        self.session = Some(ProtectionSession::new(
            note.id.clone(),
            unlocked.content,
            unlocked.key,
        ));
        self.unlock_error = None;

        tracing::info!(note_id = %note.id, "note unlocked");
        Ok(NoteState::ProtectedUnlocked)
    }

    // -- change password --------------------------------------------------

    /// Re-encrypt the open session's buffer under `new_password`.
    pub fn begin_change_password(&mut self, note: &Note, new_password: &str) -> Result<RekeyJob> {
        self.ensure_idle(&note.id)?;
        check_new_password(new_password)?;
        if !note.is_protected() {
            return Err(self.invalid(note));
        }
        let Some(session) = self.session.as_ref().filter(|s| s.note_id() == &note.id) else {
            return Err(ProtectionError::Locked(note.id.clone()));
        };

        Ok(RekeyJob {
            source: RekeySource::Buffer(Zeroizing::new(session.content().to_string())),
            new_password: Zeroizing::new(new_password.to_string()),
            cipher: self.cipher.clone(),
            ticket: self.issue(&note.id),
        })
    }

    /// Re-encrypt a locked note, given its current password.
    pub fn begin_change_password_with_current(
        &mut self,
        note: &Note,
        current: &str,
        new_password: &str,
    ) -> Result<RekeyJob> {
        self.ensure_idle(&note.id)?;
        check_new_password(new_password)?;
        let NoteBody::Protected {
            password_hash,
            encrypted_content,
        } = &note.body
        else {
            return Err(self.invalid(note));
        };
        if self.is_open(&note.id) {
            return Err(self.invalid(note));
        }

        Ok(RekeyJob {
            source: RekeySource::Stored {
                password_hash: password_hash.clone(),
                encrypted_content: encrypted_content.clone(),
                current: Zeroizing::new(current.to_string()),
            },
            new_password: Zeroizing::new(new_password.to_string()),
            cipher: self.cipher.clone(),
            ticket: self.issue(&note.id),
        })
    }

    pub fn finish_change_password(
        &mut self,
        note: &mut Note,
        ticket: &Ticket,
        result: Result<Sealed>,
        now: DateTime<Utc>,
    ) -> Result<NoteState> {
        self.settle(ticket)?;
        let sealed = result.map_err(|e| {
            tracing::warn!(note_id = %note.id, error = %e, "password change failed");
            e
        })?;

        note.body = NoteBody::Protected {
            password_hash: sealed.password_hash,
            encrypted_content: sealed.encrypted_content,
        };
        note.updated_at = now;

        if let Some(session) = self.session.as_mut().filter(|s| s.note_id() == &note.id) {
            session.rekey(sealed.key);
            session.mark_clean();
        }

        tracing::info!(note_id = %note.id, "note password changed");
        Ok(self.state(note))
    }

    // -- synchronous operations ------------------------------------------

    /// Change a note's content. Returns whether anything changed.
    pub fn edit(&mut self, note: &mut Note, content: &str, now: DateTime<Utc>) -> Result<bool> {
        self.ensure_idle(&note.id)?;

        let changed = match &mut note.body {
            NoteBody::Plain { content: current } => {
                if current == content {
                    false
                } else {
                    current.zeroize();
                    *current = content.to_string();
                    true
                }
            }
            NoteBody::Protected { .. } => {
                match self.session.as_mut().filter(|s| s.note_id() == &note.id) {
                    Some(session) => session.edit(content),
                    None => return Err(ProtectionError::Locked(note.id.clone())),
                }
            }
        };

        if changed {
            note.updated_at = now;
        }
        Ok(changed)
    }

    /// Re-seal the working buffer into the note's ciphertext if it changed.
    pub fn commit(&mut self, note: &mut Note) -> Result<bool> {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.note_id() == &note.id && s.is_dirty())
        else {
            return Ok(false);
        };

        let note_id = note.id.clone();
        let NoteBody::Protected {
            encrypted_content, ..
        } = &mut note.body
        else {
            return Err(ProtectionError::corrupt(&note_id, "session open on an unprotected note"));
        };

        *encrypted_content = self.cipher.seal(session.key(), session.content())?;
        session.mark_clean();

        tracing::debug!(note_id = %note_id, "session committed");
        Ok(true)
    }

    /// Turn the open session back into plaintext and drop protection.
    pub fn unprotect(&mut self, note: &mut Note, now: DateTime<Utc>) -> Result<NoteState> {
        self.ensure_idle(&note.id)?;
        if !note.is_protected() {
            return Err(self.invalid(note));
        }
        if !self.is_open(&note.id) {
            return Err(ProtectionError::Locked(note.id.clone()));
        }
        let Some(session) = self.session.take() else {
            return Err(ProtectionError::Locked(note.id.clone()));
        };

        let content = session.into_content();
        note.body = NoteBody::Plain {
            content: content.to_string(),
        };
        note.updated_at = now;

        tracing::info!(note_id = %note.id, "note unprotected");
        Ok(NoteState::Unprotected)
    }

    /// Commit and close the note's session. No-op when it has none.
    pub fn switch_away(&mut self, note: &mut Note) -> Result<()> {
        if self
            .unlock_error
            .as_ref()
            .is_some_and(|(id, _)| id == &note.id)
        {
            self.unlock_error = None;
        }
        if !self.is_open(&note.id) {
            return Ok(());
        }

        self.commit(note)?;
        self.session = None;
        tracing::debug!(note_id = %note.id, "session closed");
        Ok(())
    }

    /// Drop the note's session without committing (note deleted).
    pub fn discard(&mut self, note_id: &NoteId) {
        if self.is_open(note_id) {
            self.session = None;
        }
        if self.unlock_error.as_ref().is_some_and(|(id, _)| id == note_id) {
            self.unlock_error = None;
        }
    }

    /// Forget every session and pending transition.
    pub fn reset(&mut self) {
        self.session = None;
        self.in_flight.clear();
        self.unlock_error = None;
        self.epoch = self.epoch.wrapping_add(1);
    }
}
