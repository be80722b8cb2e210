//! Object storage for segment files.
//!
//! Objects are immutable blobs addressed by `/`-separated keys. Two stores
//! are provided: [`LocalStore`] on a local directory and [`MemoryStore`]
//! in process memory.

use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A blob store holding segment files.
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `key`, replacing any existing object.
    fn put_object(&self, key: &str, data: Bytes) -> Result<()>;

    /// Fetches the object under `key`, `NotFound` if absent.
    fn get_object(&self, key: &str) -> Result<Bytes>;

    /// Lists keys starting with `prefix`, in ascending order.
    fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes the object under `key`. Deleting a missing object is not an error.
    fn delete_object(&self, key: &str) -> Result<()>;
}

/// Suffix of in-progress writes, never listed.
const TEMP_SUFFIX: &str = ".tmp";

/// Store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            return Err(Error::invalid_argument(format!("invalid object key '{}'", key)));
        }
        Ok(self.root.join(key))
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect(&path, prefix, out)?;
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.root) else { continue };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) && !key.ends_with(TEMP_SUFFIX) {
                out.push(key);
            }
        }

        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&temp, &path)?;

        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Bytes> {
        match fs::read(self.path_for(key)?) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = match prefix.rfind('/') {
            Some(idx) => self.root.join(&prefix[..idx]),
            None => self.root.clone(),
        };

        let mut keys = Vec::new();
        self.collect(&dir, prefix, &mut keys)?;
        keys.sort();
        Ok(keys)
    }

    fn delete_object(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Store keeping objects in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects held.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.write().insert(key.to_string(), data);
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Bytes> {
        self.objects.read().get(key).cloned().ok_or_else(|| Error::not_found(key.to_string()))
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }
}
