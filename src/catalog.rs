//! Catalog of the tries known for each table.
//!
//! Every key ever registered stays in the catalog, split into live and
//! garbage. A key turns to garbage once the next level fully covers it:
//!
//! - a level-0 key once `l01-rc-b<same block>` is known;
//! - a level-N key (N >= 1) once all `W` child partitions at level N+1,
//!   with the same recency and ending its `W^N`-block window, are known.
//!
//! Additions can be recorded in a manifest of JSON lines, replayed on open.

use crate::error::{Error, Result};
use crate::segment::meta_file_dir;
use crate::storage::ObjectStore;
use crate::trie::{parse_key, TrieKey};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within a catalog directory.
pub const MANIFEST_FILE: &str = "CATALOG";

/// A manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEdit {
    /// Tries registered for a table.
    AddTries {
        /// Table name.
        table: String,
        /// Trie keys in string form.
        keys: Vec<String>,
    },
}

/// Tries of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableTries {
    live: BTreeSet<TrieKey>,
    garbage: BTreeSet<TrieKey>,
}

impl TableTries {
    /// Keys not yet superseded.
    pub fn live(&self) -> &BTreeSet<TrieKey> {
        &self.live
    }

    /// Keys superseded by a later level.
    pub fn garbage(&self) -> &BTreeSet<TrieKey> {
        &self.garbage
    }

    /// Returns true if `key` was ever registered.
    pub fn contains(&self, key: &TrieKey) -> bool {
        self.live.contains(key) || self.garbage.contains(key)
    }

    /// Every registered key.
    pub fn all(&self) -> impl Iterator<Item = &TrieKey> + '_ {
        self.live.iter().chain(self.garbage.iter())
    }

    /// Highest block index of any registered key.
    pub fn max_block_index(&self) -> Option<u64> {
        self.all().map(|k| k.block_index).max()
    }

    fn add(&mut self, keys: impl IntoIterator<Item = TrieKey>, level_width: u64) {
        for key in keys {
            if !self.contains(&key) {
                self.live.insert(key);
            }
        }

        let superseded: Vec<TrieKey> =
            self.live.iter().filter(|key| self.is_superseded(key, level_width)).cloned().collect();
        for key in superseded {
            log::debug!("Trie {} superseded", key);
            self.live.remove(&key);
            self.garbage.insert(key);
        }
    }

    fn is_superseded(&self, key: &TrieKey, level_width: u64) -> bool {
        if key.level == 0 {
            return self.contains(&TrieKey::new(1, None, Vec::new(), key.block_index));
        }

        let Some(span) = u32::try_from(key.level).ok().and_then(|level| level_width.checked_pow(level)) else {
            return false;
        };
        let window_end = (key.block_index / span).checked_add(1).and_then(|w| w.checked_mul(span));
        let Some(window_end) = window_end.map(|end| end - 1) else {
            return false;
        };

        (0..level_width).all(|d| {
            let mut part = key.part.clone();
            part.push(d as u8);
            self.contains(&TrieKey { level: key.level + 1, recency: key.recency, part, block_index: window_end })
        })
    }
}

/// Registry of tries per table.
pub struct TrieCatalog {
    level_width: u64,
    tables: RwLock<BTreeMap<String, TableTries>>,
    manifest: Option<Mutex<File>>,
}

impl TrieCatalog {
    /// Creates an in-memory catalog for tries of fan-out `level_width`.
    pub fn new(level_width: usize) -> Self {
        Self { level_width: level_width as u64, tables: RwLock::new(BTreeMap::new()), manifest: None }
    }

    /// Opens a catalog persisted in `dir`, replaying its manifest if present.
    pub fn open<P: AsRef<Path>>(dir: P, level_width: usize) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let manifest_path: PathBuf = dir.as_ref().join(MANIFEST_FILE);
        let catalog = Self::new(level_width);

        if manifest_path.exists() {
            log::info!("Recovering catalog from manifest: {:?}", manifest_path);
            let reader = BufReader::new(File::open(&manifest_path)?);
            let mut tables = catalog.tables.write();

            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }

                let edit: CatalogEdit = serde_json::from_str(&line)
                    .map_err(|e| Error::corruption(format!("Failed to parse manifest entry: {}", e)))?;
                match edit {
                    CatalogEdit::AddTries { table, keys } => {
                        let keys = keys.iter().map(|k| parse_key(k)).collect::<Result<Vec<_>>>()?;
                        tables.entry(table).or_default().add(keys, catalog.level_width);
                    }
                }
            }

            log::info!("Recovered {} tables from catalog manifest", tables.len());
        }

        let file = OpenOptions::new().create(true).append(true).open(&manifest_path)?;
        Ok(Self { manifest: Some(Mutex::new(file)), ..catalog })
    }

    /// Registers `keys` for `table` and recomputes supersession.
    ///
    /// This is the commit point of a compaction job: the keys are logged and
    /// applied under one write lock.
    pub fn add_tries(&self, table: &str, keys: Vec<TrieKey>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write();

        if let Some(manifest) = &self.manifest {
            let edit = CatalogEdit::AddTries {
                table: table.to_string(),
                keys: keys.iter().map(|k| k.to_string()).collect(),
            };
            let json = serde_json::to_string(&edit)?;
            let mut file = manifest.lock();
            writeln!(file, "{}", json)?;
            file.flush()?;
        }

        log::info!("Registering {} tries for table {}", keys.len(), table);
        tables.entry(table.to_string()).or_default().add(keys, self.level_width);
        Ok(())
    }

    /// Registers every trie whose metadata file is present in `store` for `table`.
    pub fn load_table(&self, store: &dyn ObjectStore, table: &str) -> Result<usize> {
        let dir = meta_file_dir(table);
        let mut keys = Vec::new();
        for object in store.list_objects(&dir)? {
            let Some(name) = object.strip_prefix(&dir).and_then(|n| n.strip_suffix(".seg")) else {
                continue;
            };
            keys.push(parse_key(name)?);
        }

        let count = keys.len();
        self.add_tries(table, keys)?;
        Ok(count)
    }

    /// Fan-out the catalog was created with.
    pub fn level_width(&self) -> usize {
        self.level_width as usize
    }

    /// Names of every table with registered tries.
    pub fn tables(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// A copy of the tries of `table`.
    pub fn table_tries(&self, table: &str) -> TableTries {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Live keys of `table` in key order.
    pub fn live_tries(&self, table: &str) -> Vec<TrieKey> {
        self.tables.read().get(table).map(|t| t.live.iter().cloned().collect()).unwrap_or_default()
    }

    /// Superseded keys of `table`.
    pub fn garbage_tries(&self, table: &str) -> Vec<TrieKey> {
        self.tables.read().get(table).map(|t| t.garbage.iter().cloned().collect()).unwrap_or_default()
    }
}
