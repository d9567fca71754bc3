//! File-backed state store: one file per entry under a data directory.

use std::fs;
use std::path::{Path, PathBuf};

use super::{StateKey, StateStore, StorageError};

/// [`StateStore`] writing each entry to `<data_dir>/<name>.json`.
///
/// Writes go through a temporary file and a rename so a reader never sees a
/// half-written entry. Nothing spans multiple entries.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a data directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: StateKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

impl StateStore for FileStore {
    fn exists(&self, key: StateKey) -> bool {
        self.path(key).exists()
    }

    fn read(&self, key: StateKey) -> Result<Vec<u8>, StorageError> {
        let path = self.path(key);
        if !path.exists() {
            return Err(StorageError::Missing(key));
        }
        fs::read(&path).map_err(|source| StorageError::Io { key, source })
    }

    fn write(&self, key: StateKey, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes).map_err(|source| StorageError::Io { key, source })?;
        fs::rename(&tmp_path, &path).map_err(|source| StorageError::Io { key, source })
    }
}
