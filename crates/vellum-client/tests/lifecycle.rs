//! End-to-end note lifecycle: protection, persistence and autosave together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use vellum_client::{AutosaveEvent, AutosaveScheduler, Editor, NoteState, ProtectionError};
use vellum_shared::constants::SNAPSHOT_VERSION;
use vellum_shared::{Cipher, KdfParams, SystemClock};
use vellum_store::backend::Write;
use vellum_store::{
    Backup, KvBackend, MemoryBackend, Note, NoteBody, PersistenceStore, SqliteBackend,
    StoreConfig, StoreErrorKind, Theme,
};

fn cipher() -> Cipher {
    Cipher::new(KdfParams::new(64, 1, 1))
}

fn memory_store() -> (Arc<PersistenceStore>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(PersistenceStore::with_backend(backend.clone()));
    (store, backend)
}

#[derive(Default)]
struct CountingBackend {
    inner: MemoryBackend,
    saves: AtomicUsize,
}

impl KvBackend for CountingBackend {
    fn get(&self, key: &str) -> vellum_store::Result<Option<String>> {
        self.inner.get(key)
    }

    fn write_batch(&self, writes: &[Write<'_>]) -> vellum_store::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.write_batch(writes)
    }

    fn usage(&self) -> vellum_store::Result<usize> {
        self.inner.usage()
    }

    fn probe(&self) -> vellum_store::Result<()> {
        self.inner.probe()
    }
}

#[tokio::test]
async fn wrong_password_keeps_note_locked_then_right_one_opens_it() {
    let (store, _) = memory_store();
    let editor = Editor::open(store, cipher(), Arc::new(SystemClock));
    let id = editor.create_note("diary", "the original text").await.unwrap();

    editor.protect(&id, "secret123").await.unwrap();

    let err = editor.unlock(&id, "wrong").await.unwrap_err();
    assert!(matches!(err, ProtectionError::WrongPassword));
    let view = editor.view(&id).await.unwrap();
    assert!(!view.is_unlocked);
    assert!(view.decrypted_content.is_none());
    assert!(view.unlock_error.is_some());
    assert!(editor.content(&id).await.unwrap().is_none());

    assert_eq!(
        editor.unlock(&id, "secret123").await.unwrap(),
        NoteState::ProtectedUnlocked
    );
    assert_eq!(
        editor.content(&id).await.unwrap().as_deref(),
        Some("the original text")
    );
}

#[tokio::test(start_paused = true)]
async fn autosave_writes_once_when_nothing_changes() {
    let backend = Arc::new(CountingBackend::default());
    let store = Arc::new(PersistenceStore::with_backend(backend.clone()));
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));

    let id = editor.create_note("t", "").await.unwrap();
    editor.edit(&id, "some content").await.unwrap();

    let (_cmd, mut events, _handle) =
        AutosaveScheduler::new(editor.workspace(), store, Duration::from_secs(1)).spawn();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(events.recv().await.is_some_and(|e| e.is_saved()));
    assert_eq!(events.recv().await, Some(AutosaveEvent::Skipped));
    assert_eq!(backend.saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restore_brings_back_every_note_locked() {
    let (source_store, _) = memory_store();
    let source = Editor::open(source_store, cipher(), Arc::new(SystemClock));
    for i in 0..3 {
        let id = source
            .create_note(&format!("secret {i}"), &format!("hidden {i}"))
            .await
            .unwrap();
        source.protect(&id, "password1").await.unwrap();
    }
    for i in 0..2 {
        source
            .create_note(&format!("open {i}"), "visible")
            .await
            .unwrap();
    }
    let backup = source.create_backup().await.unwrap();

    let (store, _) = memory_store();
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));
    let stats = editor.restore_from_backup(&backup).await.unwrap();
    assert_eq!(stats.notes_restored, 5);
    assert_eq!(stats.protected_notes, 3);

    let notes = store.load();
    assert_eq!(notes.len(), 5);
    let protected: Vec<&Note> = notes.iter().filter(|n| n.is_protected()).collect();
    assert_eq!(protected.len(), 3);
    for note in protected {
        assert_eq!(
            editor.state(&note.id).await.unwrap(),
            NoteState::ProtectedLocked
        );
        let NoteBody::Protected {
            encrypted_content, ..
        } = &note.body
        else {
            unreachable!();
        };
        assert!(!encrypted_content.is_empty());
    }
}

#[tokio::test]
async fn malformed_backup_changes_nothing() {
    let (store, _) = memory_store();
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));
    let id = editor.create_note("keep", "me").await.unwrap();
    editor.save_now().await.unwrap();

    let bad = serde_json::json!({
        "version": "2.0.0",
        "notes": [{
            "id": "x",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "isPasswordProtected": true,
            "passwordHash": "v1$whatever",
            "encryptedContent": "",
        }],
    });
    let err = editor
        .restore_from_backup(&bad.to_string())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtectionError::Store(ref e) if e.kind() == StoreErrorKind::MalformedBackup
    ));

    assert_eq!(editor.content(&id).await.unwrap().as_deref(), Some("me"));
    assert_eq!(store.load().len(), 1);
}

#[tokio::test]
async fn plaintext_never_reaches_storage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vellum.db");
    let store = Arc::new(PersistenceStore::with_backend(Arc::new(
        SqliteBackend::open_at(&path).unwrap(),
    )));
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));

    let id = editor.create_note("t", "first draft marker").await.unwrap();
    editor.protect(&id, "password1").await.unwrap();
    editor.unlock(&id, "password1").await.unwrap();
    editor.edit(&id, "second draft marker").await.unwrap();
    editor.save_now().await.unwrap();

    let backup = store.create_backup().unwrap();
    assert!(!backup.contains("draft marker"));
    let needle = b"draft marker";
    for file in [path.clone(), dir.path().join("vellum.db-wal")] {
        if let Ok(raw) = std::fs::read(&file) {
            assert!(!raw.windows(needle.len()).any(|w| w == needle));
        }
    }

    editor.reload().await;
    assert_eq!(
        editor.state(&id).await.unwrap(),
        NoteState::ProtectedLocked
    );
    editor.unlock(&id, "password1").await.unwrap();
    assert_eq!(
        editor.content(&id).await.unwrap().as_deref(),
        Some("second draft marker")
    );
}

#[tokio::test]
async fn reopening_the_store_starts_every_protected_note_locked() {
    let (store, _) = memory_store();
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));
    let id = editor.create_note("t", "x").await.unwrap();
    editor.protect(&id, "password1").await.unwrap();
    editor.unlock(&id, "password1").await.unwrap();
    editor.save_now().await.unwrap();

    let reopened = Editor::open(store, cipher(), Arc::new(SystemClock));
    assert_eq!(
        reopened.state(&id).await.unwrap(),
        NoteState::ProtectedLocked
    );
    assert!(!reopened.view(&id).await.unwrap().is_unlocked);
}

#[tokio::test]
async fn switching_away_twice_is_the_same_as_once() {
    let (store, _) = memory_store();
    let editor = Editor::open(store, cipher(), Arc::new(SystemClock));
    let id = editor.create_note("t", "a").await.unwrap();
    editor.protect(&id, "password1").await.unwrap();
    editor.unlock(&id, "password1").await.unwrap();
    editor.edit(&id, "b").await.unwrap();

    editor.switch_away().await.unwrap();
    let once: Vec<Note> = editor.workspace().lock().await.notes().to_vec();
    editor.switch_away().await.unwrap();
    let twice: Vec<Note> = editor.workspace().lock().await.notes().to_vec();

    assert_eq!(once, twice);
    assert_eq!(editor.state(&id).await.unwrap(), NoteState::ProtectedLocked);
}

#[tokio::test]
async fn unusable_backend_degrades_without_losing_the_working_copy() {
    let (store, backend) = memory_store();
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));
    let id = editor.create_note("t", "in memory").await.unwrap();

    backend.set_available(false);
    let err = editor.save_now().await.unwrap_err();
    assert!(matches!(
        err,
        ProtectionError::Store(ref e) if e.kind() == StoreErrorKind::BackendUnavailable
    ));
    assert!(store.load().is_empty());
    assert_eq!(
        editor.content(&id).await.unwrap().as_deref(),
        Some("in memory")
    );

    backend.set_available(true);
    editor.save_now().await.unwrap();
    assert_eq!(store.load().len(), 1);
}

#[tokio::test]
async fn oversized_snapshot_keeps_previous_save() {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(PersistenceStore::new(
        backend,
        StoreConfig {
            size_budget: 4_096,
            backend_quota: 8_192,
        },
        Arc::new(SystemClock),
    ));
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));
    let id = editor.create_note("t", "small").await.unwrap();
    editor.save_now().await.unwrap();

    editor.edit(&id, &"z".repeat(10_000)).await.unwrap();
    let err = editor.save_now().await.unwrap_err();
    assert!(matches!(
        err,
        ProtectionError::Store(ref e) if e.kind() == StoreErrorKind::QuotaExceeded
    ));
    assert_eq!(store.load()[0].plaintext(), Some("small"));
}

#[tokio::test]
async fn change_password_of_locked_note_needs_current_password() {
    let (store, _) = memory_store();
    let editor = Editor::open(store, cipher(), Arc::new(SystemClock));
    let id = editor.create_note("t", "body").await.unwrap();
    editor.protect(&id, "password1").await.unwrap();

    assert!(matches!(
        editor.change_password(&id, "password2").await,
        Err(ProtectionError::Locked(_))
    ));
    editor
        .change_password_with_current(&id, "password1", "password2")
        .await
        .unwrap();

    assert!(editor.unlock(&id, "password1").await.is_err());
    editor.unlock(&id, "password2").await.unwrap();
    assert_eq!(editor.content(&id).await.unwrap().as_deref(), Some("body"));
}

#[tokio::test]
async fn backup_from_previous_version_is_upgraded_on_restore() {
    let (store, _) = memory_store();
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));

    let v1 = serde_json::json!({
        "version": "1.0.0",
        "timestamp": "2023-11-15T00:00:00Z",
        "preferences": {"theme": "dark"},
        "notes": [{"id": "a", "title": "old", "content": "from v1",
                   "updatedAt": "2023-11-14T22:13:20Z", "isUnlocked": true}],
    });
    editor.restore_from_backup(&v1.to_string()).await.unwrap();

    assert_eq!(store.load()[0].plaintext(), Some("from v1"));
    assert_eq!(editor.preferences().await.theme, Theme::Dark);

    let current: Backup = serde_json::from_str(&store.create_backup().unwrap()).unwrap();
    assert_eq!(current.version, SNAPSHOT_VERSION);
    assert_eq!(current.preferences.theme, Theme::Dark);
}

/// Holds the first batch write open until released.
struct GatedBackend {
    inner: MemoryBackend,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl KvBackend for GatedBackend {
    fn get(&self, key: &str) -> vellum_store::Result<Option<String>> {
        self.inner.get(key)
    }

    fn write_batch(&self, writes: &[Write<'_>]) -> vellum_store::Result<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        self.inner.write_batch(writes)
    }

    fn usage(&self) -> vellum_store::Result<usize> {
        self.inner.usage()
    }

    fn probe(&self) -> vellum_store::Result<()> {
        self.inner.probe()
    }
}

fn titles(notes: &[Note]) -> Vec<String> {
    let mut titles: Vec<String> = notes.iter().map(|n| n.title.clone()).collect();
    titles.sort();
    titles
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restore_is_not_overwritten_by_concurrent_autosave() {
    let (source_store, _) = memory_store();
    let source = Editor::open(source_store, cipher(), Arc::new(SystemClock));
    source.create_note("restored", "from backup").await.unwrap();
    let backup = source.create_backup().await.unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let backend = Arc::new(GatedBackend {
        inner: MemoryBackend::new(),
        gate: Mutex::new(Some((entered_tx, release_rx))),
    });
    let store = Arc::new(PersistenceStore::with_backend(backend));
    let editor = Editor::open(Arc::clone(&store), cipher(), Arc::new(SystemClock));
    editor.create_note("stale", "working copy").await.unwrap();

    let scheduler = AutosaveScheduler::new(
        editor.workspace(),
        Arc::clone(&store),
        Duration::from_secs(30),
    );
    let autosave = tokio::spawn(async move { scheduler.run_once().await });
    tokio::task::spawn_blocking(move || entered_rx.recv().unwrap())
        .await
        .unwrap();

    let restoring = editor.clone();
    let restore = tokio::spawn(async move { restoring.restore_from_backup(&backup).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!restore.is_finished());

    release_tx.send(()).unwrap();
    assert!(autosave.await.unwrap().is_saved());
    assert_eq!(restore.await.unwrap().unwrap().notes_restored, 1);

    assert_eq!(titles(&store.load()), vec!["restored"]);
    assert_eq!(
        titles(editor.workspace().lock().await.notes()),
        vec!["restored"]
    );
}
