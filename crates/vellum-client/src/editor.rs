//! Async facade over the shared [`Workspace`].
//!
//! Password-driven transitions run their key derivation on the blocking
//! pool. The whole begin / derive / finish sequence lives in its own spawned
//! task, so a caller that stops waiting cannot leave a note marked in
//! flight.

use std::sync::Arc;

use tokio::sync::Mutex;
use vellum_shared::{Cipher, Clock, NoteId};
use vellum_store::{PersistenceStore, Preferences, RestoreStats};
use zeroize::Zeroizing;

use crate::autosave::persist;
use crate::error::{ProtectionError, Result};
use crate::events::{AutosaveEvent, ProtectionView};
use crate::protection::{NoteState, Ticket, Transition};
use crate::state::Workspace;

#[derive(Clone)]
pub struct Editor {
    workspace: Arc<Mutex<Workspace>>,
    store: Arc<PersistenceStore>,
}

impl Editor {
    pub fn new(workspace: Arc<Mutex<Workspace>>, store: Arc<PersistenceStore>) -> Self {
        Self { workspace, store }
    }

    /// Build a workspace from whatever the store currently holds.
    pub fn open(store: Arc<PersistenceStore>, cipher: Cipher, clock: Arc<dyn Clock>) -> Self {
        let mut workspace = Workspace::new(cipher, clock);
        workspace.load(store.load(), store.preferences());
        Self::new(Arc::new(Mutex::new(workspace)), store)
    }

    pub fn workspace(&self) -> Arc<Mutex<Workspace>> {
        Arc::clone(&self.workspace)
    }

    pub fn store(&self) -> Arc<PersistenceStore> {
        Arc::clone(&self.store)
    }

    // ------------------------------------------------------------------
    // Transitions with key derivation
    // ------------------------------------------------------------------

    async fn drive<J, B, F>(&self, begin: B, finish: F) -> Result<NoteState>
    where
        J: Transition,
        B: FnOnce(&mut Workspace) -> Result<J> + Send + 'static,
        F: FnOnce(&mut Workspace, &Ticket, Result<J::Output>) -> Result<NoteState>
            + Send
            + 'static,
    {
        let workspace = Arc::clone(&self.workspace);
        let task = tokio::spawn(async move {
            let job = {
                let mut ws = workspace.lock().await;
                begin(&mut ws)?
            };
            let ticket = job.ticket().clone();

            let result = tokio::task::spawn_blocking(move || job.run())
                .await
                .unwrap_or_else(|e| Err(ProtectionError::Internal(e.to_string())));

            let mut ws = workspace.lock().await;
            finish(&mut ws, &ticket, result)
        });

        task.await
            .map_err(|e| ProtectionError::Internal(e.to_string()))?
    }

    pub async fn protect(&self, id: &NoteId, password: &str) -> Result<NoteState> {
        let id = id.clone();
        let password = Zeroizing::new(password.to_string());
        self.drive(
            move |ws| ws.begin_protect(&id, &password),
            Workspace::finish_protect,
        )
        .await
    }

    /// Select `id` and try to open it with `password`.
    pub async fn unlock(&self, id: &NoteId, password: &str) -> Result<NoteState> {
        let id = id.clone();
        let password = Zeroizing::new(password.to_string());
        self.drive(
            move |ws| ws.begin_unlock(&id, &password),
            Workspace::finish_unlock,
        )
        .await
    }

    /// New password for the currently unlocked note.
    pub async fn change_password(&self, id: &NoteId, new_password: &str) -> Result<NoteState> {
        let id = id.clone();
        let new_password = Zeroizing::new(new_password.to_string());
        self.drive(
            move |ws| ws.begin_change_password(&id, &new_password),
            Workspace::finish_change_password,
        )
        .await
    }

    /// New password for a locked note, proven by its current one.
    pub async fn change_password_with_current(
        &self,
        id: &NoteId,
        current: &str,
        new_password: &str,
    ) -> Result<NoteState> {
        let id = id.clone();
        let current = Zeroizing::new(current.to_string());
        let new_password = Zeroizing::new(new_password.to_string());
        self.drive(
            move |ws| ws.begin_change_password_with_current(&id, &current, &new_password),
            Workspace::finish_change_password,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Quick operations
    // ------------------------------------------------------------------

    pub async fn create_note(&self, title: &str, content: &str) -> Result<NoteId> {
        self.workspace.lock().await.create_note(title, content)
    }

    pub async fn select(&self, id: &NoteId) -> Result<()> {
        self.workspace.lock().await.select(id)
    }

    pub async fn edit(&self, id: &NoteId, content: &str) -> Result<bool> {
        self.workspace.lock().await.edit(id, content)
    }

    pub async fn commit(&self, id: &NoteId) -> Result<bool> {
        self.workspace.lock().await.commit(id)
    }

    pub async fn unprotect(&self, id: &NoteId) -> Result<NoteState> {
        self.workspace.lock().await.unprotect(id)
    }

    pub async fn switch_away(&self) -> Result<()> {
        self.workspace.lock().await.switch_away()
    }

    pub async fn lock(&self) -> Result<()> {
        self.workspace.lock().await.lock()
    }

    pub async fn delete_note(&self, id: &NoteId) -> Result<()> {
        self.workspace.lock().await.delete_note(id).map(|_| ())
    }

    pub async fn state(&self, id: &NoteId) -> Result<NoteState> {
        self.workspace.lock().await.state(id)
    }

    pub async fn view(&self, id: &NoteId) -> Result<ProtectionView> {
        self.workspace.lock().await.view(id)
    }

    pub async fn content(&self, id: &NoteId) -> Result<Option<String>> {
        self.workspace.lock().await.content(id)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the working copy unless it is unchanged since the last save.
    pub async fn save_now(&self) -> Result<AutosaveEvent> {
        let mut ws = self.workspace.lock().await;
        Ok(persist(&mut ws, &self.store)?)
    }

    /// Replace the working copy with the stored data. Open sessions close
    /// without committing.
    pub async fn reload(&self) {
        let mut ws = self.workspace.lock().await;
        ws.load(self.store.load(), self.store.preferences());
    }

    /// Flush, then export the stored data.
    pub async fn create_backup(&self) -> Result<String> {
        let mut ws = self.workspace.lock().await;
        if let Err(e) = persist(&mut ws, &self.store) {
            tracing::warn!(error = %e, "backing up last stored state; current edits not saved");
        }

        let json = self.store.create_backup()?;
        let mut prefs = ws.preferences().clone();
        prefs.last_backup = self.store.preferences().last_backup;
        ws.set_preferences(prefs);
        Ok(json)
    }

    /// Restore a backup and reload from it. Nothing changes on failure.
    pub async fn restore_from_backup(&self, json: &str) -> Result<RestoreStats> {
        let mut ws = self.workspace.lock().await;
        let stats = self.store.restore_from_backup(json)?;
        ws.load(self.store.load(), self.store.preferences());
        Ok(stats)
    }

    pub async fn clear_all_data(&self) -> Result<()> {
        let mut ws = self.workspace.lock().await;
        self.store.clear_all_data()?;
        ws.load(Vec::new(), Preferences::default());
        Ok(())
    }

    pub async fn preferences(&self) -> Preferences {
        self.workspace.lock().await.preferences().clone()
    }

    /// Apply `update` to the preferences and persist them.
    pub async fn update_preferences<F>(&self, update: F) -> Result<Preferences>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut ws = self.workspace.lock().await;
        let mut prefs = ws.preferences().clone();
        update(&mut prefs);
        self.store.save_preferences(&prefs)?;
        ws.set_preferences(prefs.clone());
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use vellum_shared::{KdfParams, SystemClock};
    use vellum_store::MemoryBackend;

    use super::*;

    fn editor() -> Editor {
        let store = Arc::new(PersistenceStore::with_backend(Arc::new(MemoryBackend::new())));
        Editor::open(
            store,
            Cipher::new(KdfParams::new(64, 1, 1)),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_protect_unlock_round_trip() {
        let editor = editor();
        let id = editor.create_note("t", "hello").await.unwrap();

        assert_eq!(
            editor.protect(&id, "password1").await.unwrap(),
            NoteState::ProtectedLocked
        );
        assert!(editor.content(&id).await.unwrap().is_none());
        assert_eq!(
            editor.unlock(&id, "password1").await.unwrap(),
            NoteState::ProtectedUnlocked
        );
        assert_eq!(editor.content(&id).await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_leave_note_in_flight() {
        let editor = editor();
        let id = editor.create_note("t", "hello").await.unwrap();

        let fut = editor.protect(&id, "password1");
        let _ = tokio::time::timeout(std::time::Duration::from_millis(0), fut).await;

        for _ in 0..200 {
            if editor.state(&id).await.unwrap() == NoteState::ProtectedLocked {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(editor.state(&id).await.unwrap(), NoteState::ProtectedLocked);
        editor.unlock(&id, "password1").await.unwrap();
    }

    #[tokio::test]
    async fn test_preferences_update_persists() {
        let editor = editor();
        editor
            .update_preferences(|p| p.show_line_numbers = true)
            .await
            .unwrap();
        assert!(editor.preferences().await.show_line_numbers);
        assert!(editor.store().preferences().show_line_numbers);
    }

    #[tokio::test]
    async fn test_backup_records_time_in_workspace() {
        let editor = editor();
        editor.create_note("t", "x").await.unwrap();
        editor.create_backup().await.unwrap();
        assert!(editor.preferences().await.last_backup.is_some());
    }
}
