//! # File-Backed Shared Store
//!
//! One file per key under a directory. File names are the hex encoding of
//! the key, so any key is a valid file name and prefix scans decode names
//! back to keys.
//!
//! Writes take an exclusive `flock` on `<dir>/.lock` (via `fs2`) and land
//! through a temp file + rename, so readers never observe a torn value.
//! Reads take no lock.

use crate::error::{StoreError, StoreResult};
use crate::ports::SharedStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const LOCK_FILE: &str = ".lock";
const TEMP_SUFFIX: &str = ".tmp";

/// Directory-backed store shared by processes on one machine.
pub struct FileSharedStore {
    name: String,
    root: PathBuf,
}

impl FileSharedStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let name = name.into();
        debug!(store = %name, root = %root.display(), "Opened file store");
        Ok(Self { name, root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    fn with_write_lock<T>(&self, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        lock.lock_exclusive()?;
        let result = f();
        let _ = lock.unlock();
        result
    }
}

fn map_write_error(e: std::io::Error) -> StoreError {
    // ENOSPC has no stable ErrorKind on the MSRV.
    if e.raw_os_error() == Some(28) {
        StoreError::QuotaExceeded
    } else {
        StoreError::Io(e.to_string())
    }
}

fn write_then_rename(temp: &Path, target: &Path, value: &str) -> std::io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(value.as_bytes())?;
    file.sync_all()?;
    fs::rename(temp, target)
}

impl SharedStore for FileSharedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let target = self.path_for(key);
        let temp = self
            .root
            .join(format!("{}{}", Uuid::new_v4().simple(), TEMP_SUFFIX));
        self.with_write_lock(|| {
            write_then_rename(&temp, &target, value).map_err(|e| {
                // Partial temp files would pile up on a full disk.
                if let Err(cleanup) = fs::remove_file(&temp) {
                    if cleanup.kind() != ErrorKind::NotFound {
                        debug!(path = %temp.display(), error = %cleanup, "Failed to remove temp file");
                    }
                }
                map_write_error(e)
            })
        })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let target = self.path_for(key);
        self.with_write_lock(|| match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let Ok(bytes) = hex::decode(name) else {
                continue;
            };
            let Ok(key) = String::from_utf8(bytes) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
