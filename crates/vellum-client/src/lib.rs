//! # vellum-client
//!
//! Application side of Vellum: the in-memory workspace, the per-note
//! protection state machine, the async editor facade and the autosave
//! scheduler.

pub mod autosave;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod protection;
pub mod session;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use autosave::{AutosaveCommand, AutosaveScheduler};
pub use editor::Editor;
pub use error::ProtectionError;
pub use events::{AutosaveEvent, ProtectionView};
pub use protection::NoteState;
pub use state::Workspace;

/// Install the global tracing subscriber. `RUST_LOG` wins over `default`.
pub fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
