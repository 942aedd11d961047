//! # vellum-store
//!
//! Durable storage for Vellum notes and preferences.
//!
//! The [`PersistenceStore`] serializes the whole note collection into one
//! versioned snapshot and writes it, together with the preferences record,
//! through a [`KvBackend`]. Protected notes only ever reach the backend as
//! ciphertext. [`SqliteBackend`] is the on-disk backend; [`MemoryBackend`]
//! keeps everything in process.

pub mod backend;
pub mod backup;
pub mod database;
pub mod migrations;
pub mod models;
pub mod snapshot;
pub mod store;

mod error;

pub use backend::{KvBackend, MemoryBackend};
pub use backup::{Backup, RestoreStats};
pub use database::SqliteBackend;
pub use error::{Result, StoreError, StoreErrorKind};
pub use models::*;
pub use store::{PersistenceStore, StoreConfig};
