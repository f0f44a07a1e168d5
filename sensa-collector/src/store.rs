//! Durable raw snapshot blobs
//!
//! Layout: `<data_dir>/<user_id>/<YYYY-MM-DD_HH-MM-SS-mmm>/snapshot.raw`
//!
//! This is the one write path shared across concurrent collector handlers.
//! Writers to the same (user, timestamp) key are serialized by a per-key
//! lock, and each blob is written to a temp file then renamed into place so
//! readers never observe a partial record.

use crate::error::{Error, Result};
use crate::records::sortable_timestamp;
use parking_lot::Mutex;
use sensa_wire::Snapshot;
use sensa_wire::codec::{decode_snapshot, encode_snapshot};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BLOB_NAME: &str = "snapshot.raw";

type KeyLocks<K> = Arc<Mutex<HashMap<K, Arc<Mutex<()>>>>>;

/// Per-key mutual exclusion with entries evicted once idle
#[derive(Debug)]
pub(crate) struct LockTable<K> {
    locks: KeyLocks<K>,
}

impl<K> Clone for LockTable<K> {
    fn clone(&self) -> Self {
        Self {
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<K: std::hash::Hash + Eq + Clone> LockTable<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `f` while holding the lock for `key`.
    pub(crate) fn with_lock<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let entry = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = entry.lock();
            f()
        };

        let mut locks = self.locks.lock();
        // Only the table and `entry` remain: nobody else is waiting
        if Arc::strong_count(&entry) == 2 {
            locks.remove(key);
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Filesystem store for raw snapshot blobs
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    locks: LockTable<(u64, u64)>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: LockTable::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the blob for (user, capture time) lives.
    pub fn path_for(&self, user_id: u64, datetime: u64) -> PathBuf {
        self.root
            .join(user_id.to_string())
            .join(sortable_timestamp(datetime))
            .join(BLOB_NAME)
    }

    /// Serialize `snapshot` and write it all-or-nothing. Returns its address.
    pub fn write(&self, user_id: u64, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self.path_for(user_id, snapshot.datetime);
        let blob = encode_snapshot(snapshot);

        self.locks
            .with_lock(&(user_id, snapshot.datetime), || write_atomic(&path, &blob))?;

        log::debug!("Wrote {} bytes to {}", blob.len(), path.display());
        Ok(path)
    }

    /// Delete a blob along with its capture directory once that is empty.
    /// Failures are logged, not returned.
    pub fn remove(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Could not remove {}: {}", path.display(), e);
            return;
        }
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir(dir);
        }
        log::debug!("Removed {}", path.display());
    }

    /// Load a blob written by [`SnapshotStore::write`].
    pub fn read(path: &Path) -> Result<Snapshot> {
        let bytes = fs::read(path)?;
        Ok(decode_snapshot(&bytes)?)
    }

    /// Recover the owning user id from a blob address.
    pub fn user_id_from_path(path: &Path) -> Option<u64> {
        path.parent()?
            .parent()?
            .file_name()?
            .to_str()?
            .parse()
            .ok()
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Other(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = dir.join(tmp_name);

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Io(e));
    }
    Ok(())
}
