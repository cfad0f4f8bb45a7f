//! In-memory shared store

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::types::{HandshakeError, Result};

use super::SharedStore;

/// In-process [`SharedStore`] backed by a concurrent map.
///
/// `set_unavailable(true)` makes every operation fail, which lets tests
/// check that callers fail closed when storage goes away.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store going away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HandshakeError::Store("memory store unavailable".into()));
        }
        Ok(())
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_available()?;
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    fn all_keys(&self) -> Result<BTreeSet<String>> {
        self.check_available()?;
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.entries.remove(key).map(|(_, v)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());

        store.set("a", b"one").unwrap();
        store.set("b", b"two").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some(&b"one"[..]));

        let keys = store.all_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("b"));

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_take_is_destructive() {
        let store = MemoryStore::new();
        store.set("k", b"v").unwrap();

        assert_eq!(store.take("k").unwrap().as_deref(), Some(&b"v"[..]));
        assert!(store.take("k").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set("k", b"v").unwrap();
        store.set_unavailable(true);

        assert!(store.get("k").is_err());
        assert!(store.set("k", b"w").is_err());

        store.set_unavailable(false);
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    }
}
