//! Periodic background persistence.
//!
//! One tokio task, driven by a fixed-period ticker and by
//! [`AutosaveCommand`]s, with the usual command / notification channel
//! pair. Each attempt snapshots the workspace, fingerprints the serialized
//! result with BLAKE3 and only writes when the fingerprint differs from the
//! last successful save. Snapshot and write happen under one workspace
//! guard, so a restore or wipe never lands between them. Failures are
//! reported, never retried before the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use vellum_shared::constants::{DEFAULT_AUTOSAVE_INTERVAL_SECS, SNAPSHOT_VERSION};
use vellum_store::snapshot::SnapshotRef;
use vellum_store::{Note, PersistenceStore, Preferences, StoreError};

use crate::events::AutosaveEvent;
use crate::state::Workspace;

/// Commands sent *into* the autosave task.
#[derive(Debug)]
pub enum AutosaveCommand {
    /// Save immediately and report the outcome.
    SaveNow(oneshot::Sender<AutosaveEvent>),
    /// Restart the ticker with a new period.
    SetInterval(Duration),
    /// Stop periodic saves. Manual saves still work.
    Pause,
    Resume,
    /// Flush once more and stop.
    Shutdown,
}

pub struct AutosaveScheduler {
    workspace: Arc<Mutex<Workspace>>,
    store: Arc<PersistenceStore>,
    period: Duration,
    paused: bool,
}

impl AutosaveScheduler {
    pub fn new(
        workspace: Arc<Mutex<Workspace>>,
        store: Arc<PersistenceStore>,
        period: Duration,
    ) -> Self {
        let period = if period.is_zero() {
            warn!("zero autosave period, using default");
            Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS)
        } else {
            period
        };
        Self {
            workspace,
            store,
            period,
            paused: false,
        }
    }

    /// Scheduler using the workspace's `autoSaveInterval` preference.
    pub async fn from_preferences(
        workspace: Arc<Mutex<Workspace>>,
        store: Arc<PersistenceStore>,
    ) -> Self {
        let period = workspace.lock().await.preferences().autosave_interval();
        Self::new(workspace, store, period)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One save attempt.
    pub async fn run_once(&self) -> AutosaveEvent {
        let mut ws = self.workspace.lock().await;
        persist(&mut ws, &self.store).unwrap_or_else(failed)
    }

    /// Start the task. Returns `(command_tx, event_rx, handle)`.
    pub fn spawn(
        self,
    ) -> (
        mpsc::Sender<AutosaveCommand>,
        mpsc::Receiver<AutosaveEvent>,
        JoinHandle<()>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AutosaveCommand>(32);
        let (event_tx, event_rx) = mpsc::channel::<AutosaveEvent>(64);
        let handle = tokio::spawn(self.run(cmd_rx, event_tx));
        (cmd_tx, event_rx, handle)
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<AutosaveCommand>,
        event_tx: mpsc::Sender<AutosaveEvent>,
    ) {
        let mut ticker = new_ticker(self.period);
        info!(period_secs = self.period.as_secs_f64(), "autosave started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.paused {
                        continue;
                    }
                    if !self.workspace.lock().await.preferences().auto_save {
                        continue;
                    }
                    let event = self.run_once().await;
                    emit(&event_tx, event);
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(AutosaveCommand::SaveNow(reply)) => {
                            let event = self.run_once().await;
                            let _ = reply.send(event.clone());
                            emit(&event_tx, event);
                        }
                        Some(AutosaveCommand::SetInterval(period)) => {
                            if period.is_zero() {
                                warn!("ignoring zero autosave period");
                                continue;
                            }
                            self.period = period;
                            ticker = new_ticker(period);
                            info!(period_secs = period.as_secs_f64(), "autosave period changed");
                        }
                        Some(AutosaveCommand::Pause) => {
                            self.paused = true;
                            debug!("autosave paused");
                        }
                        Some(AutosaveCommand::Resume) => {
                            self.paused = false;
                            debug!("autosave resumed");
                        }
                        Some(AutosaveCommand::Shutdown) | None => {
                            let event = self.run_once().await;
                            emit(&event_tx, event);
                            info!("autosave stopped");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Write the workspace unless it matches the last successful save. The
/// caller keeps the workspace locked for the whole call.
pub(crate) fn persist(
    ws: &mut Workspace,
    store: &PersistenceStore,
) -> Result<AutosaveEvent, StoreError> {
    let (notes, preferences) = ws.snapshot_for_save();

    let fingerprint = fingerprint(&notes, &preferences)?;
    if ws.last_saved() == Some(fingerprint) {
        debug!("no changes since last save");
        return Ok(AutosaveEvent::Skipped);
    }

    let size = store.save(&notes, &preferences)?;
    ws.mark_saved(fingerprint);
    debug!(notes = notes.len(), size, "snapshot saved");
    Ok(AutosaveEvent::Saved {
        notes: notes.len(),
        size,
    })
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// BLAKE3 over the snapshot exactly as it would be written.
pub fn fingerprint(
    notes: &[Note],
    preferences: &Preferences,
) -> Result<blake3::Hash, StoreError> {
    let bytes = serde_json::to_vec(&SnapshotRef {
        notes,
        preferences,
        version: SNAPSHOT_VERSION,
    })?;
    Ok(blake3::hash(&bytes))
}

fn failed(e: StoreError) -> AutosaveEvent {
    warn!(error = %e, "autosave failed");
    AutosaveEvent::SaveFailed {
        kind: e.kind(),
        message: e.to_string(),
    }
}

fn emit(event_tx: &mpsc::Sender<AutosaveEvent>, event: AutosaveEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = event_tx.try_send(event) {
        debug!(?event, "autosave event dropped, receiver is behind");
    }
}
