//! # vellum-host
//!
//! Headless host for a Vellum note store.
//!
//! ```text
//! vellum-host                 load the store and autosave until Ctrl-C
//! vellum-host info            print storage usage
//! vellum-host backup <FILE>   write a backup of the stored notes
//! vellum-host restore <FILE>  replace stored notes with a backup
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{error, info, warn};
use vellum_client::config::ClientConfig;
use vellum_client::{init_tracing, AutosaveCommand, AutosaveEvent, AutosaveScheduler, Editor};
use vellum_shared::{Cipher, SystemClock};
use vellum_store::database::default_data_dir;
use vellum_store::{KvBackend, MemoryBackend, PersistenceStore, SqliteBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    init_tracing("info,vellum_client=debug,vellum_store=info");

    info!("Starting Vellum host v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let backend = open_backend(config.data_dir.as_deref());
    let store = Arc::new(PersistenceStore::new(
        backend,
        config.store,
        Arc::new(SystemClock),
    ));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => serve(store, Cipher::new(config.kdf)).await,
        ["info"] => {
            let usage = store.storage_info();
            let notes = store.load();
            println!(
                "{} notes ({} protected), {} of {} bytes used ({:.1}%)",
                notes.len(),
                notes.iter().filter(|n| n.is_protected()).count(),
                usage.used,
                usage.available,
                usage.percentage
            );
            Ok(())
        }
        ["backup", file] => {
            let json = store.create_backup()?;
            tokio::fs::write(file, json.as_bytes())
                .await
                .with_context(|| format!("Failed to write backup to {file}"))?;
            info!(path = %file, "Backup written");
            Ok(())
        }
        ["restore", file] => {
            let json = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read backup from {file}"))?;
            let stats = store.restore_from_backup(&json)?;
            println!(
                "restored {} notes ({} protected)",
                stats.notes_restored, stats.protected_notes
            );
            Ok(())
        }
        other => bail!("unknown arguments: {other:?}"),
    }
}

/// SQLite under the configured or platform data directory; in-memory
/// storage if that cannot be opened.
fn open_backend(data_dir: Option<&Path>) -> Arc<dyn KvBackend> {
    let dir: anyhow::Result<PathBuf> = match data_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => default_data_dir().map_err(Into::into),
    };

    let opened = dir.and_then(|dir| {
        std::fs::create_dir_all(&dir)?;
        Ok(SqliteBackend::open_at(&dir.join("vellum.db"))?)
    });

    match opened {
        Ok(db) => Arc::new(db),
        Err(e) => {
            warn!(error = %e, "Storage unavailable, running in memory; nothing will be kept");
            Arc::new(MemoryBackend::new())
        }
    }
}

async fn serve(store: Arc<PersistenceStore>, cipher: Cipher) -> anyhow::Result<()> {
    let editor = Editor::open(Arc::clone(&store), cipher, Arc::new(SystemClock));
    {
        let ws = editor.workspace();
        let ws = ws.lock().await;
        info!(notes = ws.notes().len(), "Notes loaded");
    }

    let scheduler = AutosaveScheduler::from_preferences(editor.workspace(), store).await;
    info!(period = ?scheduler.period(), "Autosave configured");
    let (cmd_tx, mut events, handle) = scheduler.spawn();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AutosaveEvent::Saved { notes, size } => info!(notes, size, "Saved"),
                AutosaveEvent::Skipped => {}
                AutosaveEvent::SaveFailed { kind, message } => {
                    error!(?kind, %message, "Save failed");
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    editor.lock().await?;
    if cmd_tx.send(AutosaveCommand::Shutdown).await.is_err() {
        warn!("Autosave task already stopped");
    }
    handle.await.context("Autosave task panicked")?;

    Ok(())
}
