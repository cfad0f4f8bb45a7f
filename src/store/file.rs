//! Directory-backed shared store.
//!
//! Each key is a file in a directory both applications can reach. Writes go
//! to a hidden temp file first and are renamed into place, so a reader sees
//! either the old value or the new one, never a torn write.
//!
//! # Claiming
//!
//! [`FileStore::take`] renames the key's file to a unique hidden name before
//! reading it. `rename` is atomic on a single filesystem, so when two
//! processes race to consume the same key exactly one of them wins.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::types::{HandshakeError, Result};

use super::SharedStore;

/// Prefix for temp and claim files; such names are never valid keys.
const HIDDEN_PREFIX: char = '.';

/// Durable [`SharedStore`] rooted at a shared directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Opened file store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn hidden_path(&self, tag: &str, key: &str) -> PathBuf {
        self.root
            .join(format!("{HIDDEN_PREFIX}{tag}-{key}-{}", uuid::Uuid::new_v4()))
    }
}

/// Keys are restricted to a filename-safe alphabet.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with(HIDDEN_PREFIX)
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(HandshakeError::Store(format!("Invalid store key: {key:?}")))
    }
}

impl SharedStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.hidden_path("tmp", key);
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn all_keys(&self) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with(HIDDEN_PREFIX) => {
                    keys.insert(name);
                }
                Ok(_) => {}
                Err(name) => warn!(?name, "Skipping non UTF-8 store entry"),
            }
        }
        Ok(keys)
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        let claimed = self.hidden_path("claim", key);

        match fs::rename(&path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let bytes = fs::read(&claimed);
        if let Err(e) = fs::remove_file(&claimed) {
            warn!(key, error = %e, "Failed to remove claimed entry");
        }
        Ok(Some(bytes?))
    }
}
