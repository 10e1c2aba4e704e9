//! Persistence port for durable local state.
//!
//! The store, queue, and pending flag depend on this interface so a
//! test can swap in an in-memory fake. The filesystem implementation
//! writes via temp-file + rename so a crash never leaves a
//! half-written document behind.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

use pinboard_core::Transience;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persistence io at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt persisted document `{key}`: {reason}")]
    Corrupt { key: String, reason: String },
}

impl PersistError {
    pub fn transience(&self) -> Transience {
        match self {
            PersistError::Io { .. } => Transience::Retryable,
            PersistError::Corrupt { .. } => Transience::Permanent,
        }
    }
}

/// Durable key/value document storage.
///
/// Keys are flat file-name-like strings (`store.json`, `queue.json`).
pub trait Persistence: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError>;
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), PersistError>;
    fn remove(&self, key: &str) -> Result<(), PersistError>;
}

/// Filesystem persistence rooted at a data directory.
pub struct FsPersistence {
    dir: PathBuf,
}

impl FsPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| PersistError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Persistence for FsPersistence {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Io { path, source }),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
        let final_path = self.path_for(key);
        let tmp_path = self.path_for(&format!("{key}.tmp"));
        fs::write(&tmp_path, bytes).map_err(|source| PersistError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &final_path).map_err(|source| PersistError::Io {
            path: final_path,
            source,
        })
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistError::Io { path, source }),
        }
    }
}

/// In-memory persistence for tests.
///
/// Components take `Arc<dyn Persistence>`, so "restarting" a component
/// against the same instance observes the previously saved state.
#[derive(Default)]
pub struct MemPersistence {
    docs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemPersistence {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self.docs.lock().expect("mem persistence lock poisoned").get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
        self.docs
            .lock()
            .expect("mem persistence lock poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.docs.lock().expect("mem persistence lock poisoned").remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_round_trip_and_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let p = FsPersistence::new(dir.path()).unwrap();

        assert!(p.load("store.json").unwrap().is_none());
        p.save("store.json", b"{\"tasks\":[]}").unwrap();
        assert_eq!(p.load("store.json").unwrap().unwrap(), b"{\"tasks\":[]}");

        p.save("store.json", b"{}").unwrap();
        assert_eq!(p.load("store.json").unwrap().unwrap(), b"{}");

        p.remove("store.json").unwrap();
        assert!(p.load("store.json").unwrap().is_none());
        // Removing twice is fine.
        p.remove("store.json").unwrap();
    }

    #[test]
    fn fs_save_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = FsPersistence::new(dir.path()).unwrap();
        p.save("queue.json", b"[]").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("queue.json")]);
    }

    #[test]
    fn mem_round_trip() {
        let p = MemPersistence::new();
        p.save("k", b"v").unwrap();
        assert_eq!(p.load("k").unwrap().unwrap(), b"v");
        p.remove("k").unwrap();
        assert!(p.load("k").unwrap().is_none());
    }
}
