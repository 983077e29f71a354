//! Backing key-value stores
//!
//! A backing store is opened, used for one operation and closed again for
//! every store call. Nothing is held open between calls.

use crate::error::{DirLeaseError, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Opens handles onto a backing file
pub trait BackingStore {
    /// Handle type returned by [`open`](Self::open)
    type Handle: KvHandle;

    /// Open the store at `path`. A missing file opens as an empty store.
    fn open(&self, path: &Path) -> Result<Self::Handle>;
}

/// An open backing store
pub trait KvHandle {
    /// Value bound to `key`, or [`DirLeaseError::KeyNotFound`]
    fn get(&self, key: &str) -> Result<Value>;

    /// Bind `key` to `value`
    fn set(&mut self, key: &str, value: Value) -> Result<()>;

    /// Unbind `key`; returns whether it was bound
    fn remove(&mut self, key: &str) -> Result<bool>;

    /// All bound keys, sorted
    fn keys(&self) -> Vec<String>;

    /// Flush and close the handle
    fn close(self) -> Result<()>;
}

/// On-disk layout of a [`JsonFileStore`] file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    entries: BTreeMap<String, Value>,
}

impl StoreDocument {
    const VERSION: u32 = 1;

    fn empty() -> Self {
        Self {
            version: Self::VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Backing store persisted as a single JSON document
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFileStore;

impl BackingStore for JsonFileStore {
    type Handle = JsonHandle;

    fn open(&self, path: &Path) -> Result<JsonHandle> {
        let document = if path.exists() {
            let file = File::open(path).with_path(path)?;
            let document: StoreDocument = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| DirLeaseError::BackingStore(format!("{}: {}", path.display(), e)))?;
            if document.version > StoreDocument::VERSION {
                return Err(DirLeaseError::BackingStore(format!(
                    "{}: unsupported store version {}",
                    path.display(),
                    document.version
                )));
            }
            document
        } else {
            StoreDocument::empty()
        };

        Ok(JsonHandle {
            path: path.to_path_buf(),
            document,
            dirty: false,
        })
    }
}

/// Open handle of a [`JsonFileStore`]
#[derive(Debug)]
pub struct JsonHandle {
    path: PathBuf,
    document: StoreDocument,
    dirty: bool,
}

impl KvHandle for JsonHandle {
    fn get(&self, key: &str) -> Result<Value> {
        self.document
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| DirLeaseError::KeyNotFound(key.to_string()))
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.document.entries.insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let removed = self.document.entries.remove(key).is_some();
        self.dirty |= removed;
        Ok(removed)
    }

    fn keys(&self) -> Vec<String> {
        self.document.entries.keys().cloned().collect()
    }

    fn close(self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        // Write to a sibling temp file and rename so readers never see a torn file
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let file = File::create(&temp_path).with_path(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.document)?;
        writer.flush().with_path(&temp_path)?;
        writer
            .into_inner()
            .map_err(|e| DirLeaseError::io(&temp_path, e.into_error()))?
            .sync_all()
            .with_path(&temp_path)?;

        std::fs::rename(&temp_path, &self.path).with_path(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.store");

        let handle = JsonFileStore.open(&path).unwrap();
        assert!(handle.keys().is_empty());
        assert!(matches!(handle.get("ints"), Err(DirLeaseError::KeyNotFound(_))));

        // Closing an untouched handle must not create the file
        handle.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_set_persists_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.store");

        let mut handle = JsonFileStore.open(&path).unwrap();
        handle.set("ints", json!([1, 2, 3])).unwrap();
        handle.set("label", json!("run-7")).unwrap();
        handle.close().unwrap();
        assert!(path.exists());

        let handle = JsonFileStore.open(&path).unwrap();
        assert_eq!(handle.get("ints").unwrap(), json!([1, 2, 3]));
        assert_eq!(handle.keys(), vec!["ints".to_string(), "label".to_string()]);
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.store");

        let mut handle = JsonFileStore.open(&path).unwrap();
        handle.set("a", json!(1)).unwrap();
        assert!(handle.remove("a").unwrap());
        assert!(!handle.remove("a").unwrap());
        handle.close().unwrap();

        let handle = JsonFileStore.open(&path).unwrap();
        assert!(handle.keys().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_backing_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.store");
        std::fs::write(&path, b"not json").unwrap();

        let err = JsonFileStore.open(&path).unwrap_err();
        assert!(matches!(err, DirLeaseError::BackingStore(_)));
    }
}
