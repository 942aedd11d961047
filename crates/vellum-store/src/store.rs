//! The persistence store: durable home of the note collection and user
//! preferences.
//!
//! The application owns the in-memory working copy; the store only
//! serializes and deserializes it. Writes are size-checked before anything
//! touches the backend, and multi-key updates go through a single atomic
//! batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vellum_shared::constants::{
    DEFAULT_BACKEND_QUOTA, DEFAULT_SIZE_BUDGET, SNAPSHOT_VERSION, STORAGE_KEY_DATA,
    STORAGE_KEY_PREFERENCES,
};
use vellum_shared::{Clock, SystemClock};

use crate::backend::KvBackend;
use crate::backup::{self, Backup, RestoreStats};
use crate::error::{Result, StoreError};
use crate::models::{Note, Preferences, StorageInfo};
use crate::snapshot::{self, SnapshotRef, Validation};

/// Store limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Largest serialized snapshot that will be written, in bytes.
    pub size_budget: usize,
    /// Capacity assumed for the backing medium, used for usage reporting.
    pub backend_quota: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            size_budget: DEFAULT_SIZE_BUDGET,
            backend_quota: DEFAULT_BACKEND_QUOTA,
        }
    }
}

pub struct PersistenceStore {
    backend: Arc<dyn KvBackend>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    /// Set once a snapshot from a newer build has been seen, so it is never
    /// overwritten by this one.
    write_protected: AtomicBool,
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            config,
            clock,
            write_protected: AtomicBool::new(false),
        }
    }

    /// Store with default limits and the system clock.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self::new(backend, StoreConfig::default(), Arc::new(SystemClock))
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    pub fn is_available(&self) -> bool {
        self.backend.probe().is_ok()
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protected.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    /// Serialize and persist the collection together with `preferences`.
    /// Returns the snapshot size in bytes.
    pub fn save(&self, notes: &[Note], preferences: &Preferences) -> Result<usize> {
        self.ensure_writable()?;
        let data = self.serialize_checked(notes, preferences)?;
        let prefs = serde_json::to_string(preferences)?;

        self.backend.write_batch(&[
            (STORAGE_KEY_DATA, Some(data.as_str())),
            (STORAGE_KEY_PREFERENCES, Some(prefs.as_str())),
        ])?;

        tracing::debug!(notes = notes.len(), size = data.len(), "snapshot saved");
        Ok(data.len())
    }

    /// Load the collection, never failing: an unusable backend or an
    /// unreadable payload yields an empty collection.
    pub fn load(&self) -> Vec<Note> {
        match self.load_with_migration() {
            Ok(notes) => notes,
            Err(e) => {
                tracing::error!(error = %e, "failed to load notes; starting empty");
                Vec::new()
            }
        }
    }

    /// Load the collection, upgrading older snapshot versions.
    pub fn load_with_migration(&self) -> Result<Vec<Note>> {
        let Some(raw) = self.backend.get(STORAGE_KEY_DATA)? else {
            return Ok(Vec::new());
        };

        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| StoreError::CorruptSnapshot(e.to_string()))?;

        let migrated = snapshot::migrate(value).map_err(|e| {
            if let StoreError::UnsupportedVersion(version) = &e {
                tracing::error!(%version, "snapshot written by a newer version; store is now read-only");
                self.write_protected.store(true, Ordering::SeqCst);
            }
            e
        })?;

        if migrated.was_upgraded() {
            tracing::info!(
                from = %migrated.from_version,
                to = SNAPSHOT_VERSION,
                "migrated stored snapshot"
            );
        }

        snapshot::parse_notes(migrated.snapshot.notes, Validation::Lenient)
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    /// Current preferences, falling back to defaults on any failure.
    pub fn preferences(&self) -> Preferences {
        let raw = match self.backend.get(STORAGE_KEY_PREFERENCES) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Preferences::default(),
            Err(e) => {
                tracing::warn!(error = %e, "preferences unavailable; using defaults");
                return Preferences::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to parse preferences; using defaults");
            Preferences::default()
        })
    }

    /// Refused while write-protected, like [`PersistenceStore::save`].
    pub fn save_preferences(&self, preferences: &Preferences) -> Result<()> {
        self.ensure_writable()?;
        let json = serde_json::to_string(preferences)?;
        self.backend.set(STORAGE_KEY_PREFERENCES, &json)
    }

    /// Read-modify-write of the stored preferences.
    pub fn update_preferences<F>(&self, update: F) -> Result<Preferences>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut prefs = self.preferences();
        update(&mut prefs);
        self.save_preferences(&prefs)?;
        Ok(prefs)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_write_protected() {
            return Err(StoreError::BackendUnavailable(
                "stored snapshot was written by a newer version; refusing to overwrite".into(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Backup / restore
    // ------------------------------------------------------------------

    /// Export the persisted notes and preferences as pretty-printed JSON.
    pub fn create_backup(&self) -> Result<String> {
        let notes = self.load_with_migration()?;
        let timestamp = self.clock.now();

        let backup = Backup {
            notes,
            preferences: self.preferences(),
            version: SNAPSHOT_VERSION.to_string(),
            timestamp,
        };
        let json = serde_json::to_string_pretty(&backup)?;

        if let Err(e) = self.update_preferences(|p| p.last_backup = Some(timestamp)) {
            tracing::warn!(error = %e, "could not record backup time");
        }

        tracing::info!(notes = backup.notes.len(), size = json.len(), "backup created");
        Ok(json)
    }

    /// Replace stored notes (and preferences, when the backup has them) with
    /// the backup's content. On any error the store is left untouched.
    pub fn restore_from_backup(&self, json: &str) -> Result<RestoreStats> {
        let restored = backup::parse_backup(json)?;

        let preferences = restored
            .preferences
            .clone()
            .unwrap_or_else(|| self.preferences());
        let data = self.serialize_checked(&restored.notes, &preferences)?;

        let prefs_json;
        let mut writes = vec![(STORAGE_KEY_DATA, Some(data.as_str()))];
        if restored.preferences.is_some() {
            prefs_json = serde_json::to_string(&preferences)?;
            writes.push((STORAGE_KEY_PREFERENCES, Some(prefs_json.as_str())));
        }
        self.backend.write_batch(&writes)?;
        self.write_protected.store(false, Ordering::SeqCst);

        let stats = RestoreStats {
            notes_restored: restored.notes.len(),
            protected_notes: restored.notes.iter().filter(|n| n.is_protected()).count(),
            preferences_restored: restored.preferences.is_some(),
        };

        tracing::info!(
            notes = stats.notes_restored,
            protected = stats.protected_notes,
            from_version = %restored.source_version,
            backup_time = ?restored.timestamp,
            "backup restored"
        );
        Ok(stats)
    }

    /// Wipe notes and preferences. Irreversible.
    pub fn clear_all_data(&self) -> Result<()> {
        self.backend.write_batch(&[
            (STORAGE_KEY_DATA, None),
            (STORAGE_KEY_PREFERENCES, None),
        ])?;
        self.write_protected.store(false, Ordering::SeqCst);
        tracing::warn!("all stored notes and preferences cleared");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Usage
    // ------------------------------------------------------------------

    pub fn storage_info(&self) -> StorageInfo {
        let available = self.config.backend_quota;
        match self.backend.usage() {
            Ok(used) => StorageInfo {
                used,
                available,
                percentage: if available == 0 {
                    0.0
                } else {
                    used as f64 / available as f64 * 100.0
                },
            },
            Err(e) => {
                tracing::warn!(error = %e, "storage usage unavailable");
                StorageInfo {
                    used: 0,
                    available: 0,
                    percentage: 0.0,
                }
            }
        }
    }

    fn serialize_checked(&self, notes: &[Note], preferences: &Preferences) -> Result<String> {
        let data = serde_json::to_string(&SnapshotRef {
            notes,
            preferences,
            version: SNAPSHOT_VERSION,
        })?;

        if data.len() > self.config.size_budget {
            tracing::warn!(
                size = data.len(),
                budget = self.config.size_budget,
                "snapshot over budget; not written"
            );
            return Err(StoreError::QuotaExceeded {
                size: data.len(),
                budget: self.config.size_budget,
            });
        }
        Ok(data)
    }
}
