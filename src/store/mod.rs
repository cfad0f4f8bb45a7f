//! Shared key-value store
//!
//! The only channel between the two applications. It is durable across
//! restarts and visible to both sides, but offers no atomicity across keys
//! and no change notification.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process map, used by tests and single-process demos
//! - [`FileStore`]: one file per key in a shared directory, durable and
//!   visible to any process that can read the directory

pub mod file;
pub mod keys;
pub mod memory;

use std::collections::BTreeSet;

use crate::types::Result;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Process-shared key-value store.
///
/// Reads and writes are synchronous but may carry OS latency. A returned
/// `Ok(())` from [`SharedStore::set`] is best-effort, not a commit.
pub trait SharedStore: Send + Sync {
    /// Read a value. Absent keys return `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, overwriting any previous one.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// List every key currently present.
    fn all_keys(&self) -> Result<BTreeSet<String>>;

    /// Read a value and remove it.
    ///
    /// Backends that can claim a key atomically override this so that only
    /// one reader ever observes the value. The default is a plain
    /// get-then-remove and leaves a window where two readers both succeed.
    fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.get(key)?;
        if value.is_some() {
            self.remove(key)?;
        }
        Ok(value)
    }
}

impl<S: SharedStore + ?Sized> SharedStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn all_keys(&self) -> Result<BTreeSet<String>> {
        (**self).all_keys()
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).take(key)
    }
}
