//! Durable key/value stores for job ids and experiment arms.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use citecheck_core::{Error, JobStore, Result};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Storage("store lock poisoned".to_string()))
}

/// In-memory store.
///
/// Clones share the same map, so a clone handed to one component observes
/// writes from another. Per-key write counts are kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<Mutex<HashMap<String, usize>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls made for `key`.
    pub fn write_count(&self, key: &str) -> usize {
        lock(&self.writes)
            .map(|w| w.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries)?.insert(key.to_string(), value.to_string());
        *lock(&self.writes)?.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }

    fn clear_if(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = lock(&self.entries)?;
        if entries.get(key).map(String::as_str) == Some(expected) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// JSON-file store surviving process restarts.
///
/// The whole map is rewritten on every mutation through a temp file and a
/// rename, so a crash never leaves a half-written file. A file that cannot be
/// parsed is treated as empty and replaced on the next write.
#[derive(Debug)]
pub struct FileJobStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileJobStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "State file is corrupt, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::Storage(format!("{}: {}", path.display(), e))),
        };

        debug!(path = %path.display(), keys = entries.len(), "Opened state file");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }

    /// Write `next` to disk, then make it the live map.
    ///
    /// A failed write leaves the live map untouched.
    fn commit(
        &self,
        entries: &mut HashMap<String, String>,
        next: HashMap<String, String>,
    ) -> Result<()> {
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

impl JobStore for FileJobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock(&self.entries)?;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.commit(&mut entries, next)?;
        debug!(key, "Stored key");
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut entries = lock(&self.entries)?;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.commit(&mut entries, next)?;
        debug!(key, "Cleared key");
        Ok(())
    }

    fn clear_if(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = lock(&self.entries)?;
        if entries.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(key);
        self.commit(&mut entries, next)?;
        debug!(key, "Cleared key");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryJobStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.write_count("k"), 1);

        store.clear("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        store.clear("k").unwrap();
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemoryJobStore::new();
        let other = store.clone();
        store.set("current_job_id", "job-1").unwrap();
        assert_eq!(other.get("current_job_id").unwrap().as_deref(), Some("job-1"));
    }

    #[test]
    fn test_clear_if_only_removes_expected_value() {
        let store = MemoryJobStore::new();
        store.set("current_job_id", "job-b").unwrap();

        assert!(!store.clear_if("current_job_id", "job-a").unwrap());
        assert_eq!(
            store.get("current_job_id").unwrap().as_deref(),
            Some("job-b")
        );

        assert!(store.clear_if("current_job_id", "job-b").unwrap());
        assert_eq!(store.get("current_job_id").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = FileJobStore::open(&path).unwrap();
            store.set("current_job_id", "job-7").unwrap();
            store.set("model_preference", "model_b").unwrap();
        }

        let store = FileJobStore::open(&path).unwrap();
        assert_eq!(
            store.get("current_job_id").unwrap().as_deref(),
            Some("job-7")
        );
        assert_eq!(
            store.get("model_preference").unwrap().as_deref(),
            Some("model_b")
        );
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");

        let store = FileJobStore::open(&path).unwrap();
        store.set("k", "v").unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_corrupt_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileJobStore::open(&path).unwrap();
        assert_eq!(store.get("current_job_id").unwrap(), None);

        store.set("current_job_id", "job-1").unwrap();
        let reopened = FileJobStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("current_job_id").unwrap().as_deref(),
            Some("job-1")
        );
    }

    #[test]
    fn test_file_store_failed_write_keeps_memory_in_sync() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let path = state_dir.join("state.json");

        let store = FileJobStore::open(&path).unwrap();
        store.set("current_job_id", "job-1").unwrap();

        // A regular file where the state directory should be.
        fs::remove_dir_all(&state_dir).unwrap();
        fs::write(&state_dir, "").unwrap();

        assert!(store.set("current_job_id", "job-2").is_err());
        assert_eq!(
            store.get("current_job_id").unwrap().as_deref(),
            Some("job-1")
        );

        assert!(store.set("model_preference", "model_a").is_err());
        assert_eq!(store.get("model_preference").unwrap(), None);

        assert!(store.clear("current_job_id").is_err());
        assert!(store.clear_if("current_job_id", "job-1").is_err());
        assert_eq!(
            store.get("current_job_id").unwrap().as_deref(),
            Some("job-1")
        );
    }

    #[test]
    fn test_file_store_clear_if_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = FileJobStore::open(&path).unwrap();
        store.set("current_job_id", "job-1").unwrap();
        assert!(store.clear_if("current_job_id", "job-1").unwrap());

        let reopened = FileJobStore::open(&path).unwrap();
        assert_eq!(reopened.get("current_job_id").unwrap(), None);
    }
}
