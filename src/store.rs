//! Output Store
//!
//! Durable, keyed byte storage for finished job payloads - one blob per
//! job key, laid out as `<root>/<owner>/<id>` on disk. The in-memory
//! store backs tests and embedded use.

use crate::job::JobKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Keyed blob storage for job output
pub trait OutputStore: Send + Sync {
    fn write(&self, key: &JobKey, bytes: &[u8]) -> io::Result<()>;
    fn read(&self, key: &JobKey) -> io::Result<Vec<u8>>;
    fn delete(&self, key: &JobKey) -> io::Result<()>;
}

/// Filesystem-backed store: one file per job under the owner's directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the store root. Payloads left behind by a
    /// previous process are orphans - jobs do not survive restarts - so any
    /// existing owner directories are swept.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(FileStore { root })
    }

    fn path(&self, key: &JobKey) -> PathBuf {
        self.root
            .join(key.owner_id.to_string())
            .join(&key.job_id)
    }
}

impl OutputStore for FileStore {
    fn write(&self, key: &JobKey, bytes: &[u8]) -> io::Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }

    fn read(&self, key: &JobKey) -> io::Result<Vec<u8>> {
        fs::read(self.path(key))
    }

    fn delete(&self, key: &JobKey) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory store guarded by a mutex
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<JobKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of payloads currently held
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    /// Whether a payload exists for the key
    pub fn contains(&self, key: &JobKey) -> bool {
        self.blobs.lock().contains_key(key)
    }
}

impl OutputStore for MemoryStore {
    fn write(&self, key: &JobKey, bytes: &[u8]) -> io::Result<()> {
        self.blobs.lock().insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, key: &JobKey) -> io::Result<Vec<u8>> {
        self.blobs
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, key.to_string()))
    }

    fn delete(&self, key: &JobKey) -> io::Result<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }
}
