//! Key-value backends the persistence store writes through.
//!
//! The store only needs string keys and string values, written in atomic
//! batches. [`crate::database::SqliteBackend`] is the on-disk implementation;
//! [`MemoryBackend`] serves tests and in-memory-only operation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Result, StoreError};

/// A single write in a batch. `None` deletes the key.
pub type Write<'a> = (&'a str, Option<&'a str>);

pub trait KvBackend: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Apply every write or none of them.
    fn write_batch(&self, writes: &[Write<'_>]) -> Result<()>;

    /// Bytes currently held (keys plus values).
    fn usage(&self) -> Result<usize>;

    /// Check that the medium can be used at all.
    fn probe(&self) -> Result<()>;

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_batch(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.write_batch(&[(key, None)])
    }
}

/// Process-local backend. Availability can be toggled to simulate an
/// unusable medium.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    available: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::BackendUnavailable(
                "memory backend disabled".into(),
            ))
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| StoreError::BackendUnavailable(format!("Lock poisoned: {e}")))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.entries()?.get(key).cloned())
    }

    fn write_batch(&self, writes: &[Write<'_>]) -> Result<()> {
        self.check()?;
        let mut entries = self.entries()?;
        for (key, value) in writes {
            match value {
                Some(v) => {
                    entries.insert(key.to_string(), v.to_string());
                }
                None => {
                    entries.remove(*key);
                }
            }
        }
        Ok(())
    }

    fn usage(&self) -> Result<usize> {
        self.check()?;
        Ok(self
            .entries()?
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum())
    }

    fn probe(&self) -> Result<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_writes_and_deletes() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(&[("a", Some("1")), ("b", Some("22"))])
            .unwrap();
        assert_eq!(backend.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(backend.usage().unwrap(), 2 + 3);

        backend.write_batch(&[("a", None)]).unwrap();
        assert!(backend.get("a").unwrap().is_none());
    }

    #[test]
    fn test_unavailable_backend_rejects_everything() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").unwrap();
        backend.set_available(false);

        assert!(matches!(
            backend.get("k"),
            Err(StoreError::BackendUnavailable(_))
        ));
        assert!(backend.set("k", "w").is_err());
        assert!(backend.probe().is_err());

        backend.set_available(true);
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"));
    }
}
