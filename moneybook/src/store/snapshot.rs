//! Atomic on-disk snapshot of one ordered collection.
//!
//! Writes go to a sibling temp file which is fsynced and then renamed over
//! the target, so a crash leaves either the old or the new snapshot on disk,
//! never a mix.

use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use moneybook_proto::codec;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::StoreError;

/// File-backed snapshot of a `Vec<T>`.
#[derive(Debug)]
pub struct SnapshotFile<T> {
    path: PathBuf,
    _items: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> SnapshotFile<T> {
    /// Binds a snapshot to `path`. Nothing is read or created yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _items: PhantomData,
        }
    }

    /// Location of the snapshot on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot. A missing or empty file is an empty collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::Corrupt`] if its contents do not decode.
    pub fn load(&self) -> Result<Vec<T>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        codec::decode_snapshot(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the snapshot with `items`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if the items cannot be serialized, or
    /// [`StoreError::Io`] if any filesystem step fails.
    pub fn save(&self, items: &[T]) -> Result<(), StoreError> {
        let bytes = codec::encode_snapshot(items).map_err(StoreError::Encode)?;
        self.write_atomically(&bytes).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
