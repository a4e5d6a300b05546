//! Persistent bookkeeping of what has been fetched into the incoming store.
//!
//! The store is one JSON document:
//!
//! ```json
//! {"version": "1.0", "entries": {"data/test.txt": {"url": "...", "size": 11, "mtime": null}}}
//! ```
//!
//! Loading fails closed: a document that cannot be read, parsed, or that carries
//! another version is an error, never an empty store. Saving goes through a temp
//! file in the same directory followed by a rename, so the previous document
//! survives a crash mid-write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::error::StoreError;

/// Version written to and accepted from the document.
pub const STAMP_STORE_VERSION: &str = "1.0";

/// Last known remote state of one incoming file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampRecord {
    /// Path relative to the incoming root, `/`-separated.
    pub path: String,
    pub url: String,
    pub size: Option<i64>,
    pub mtime: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: String,
    entries: BTreeMap<String, Entry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    url: String,
    size: Option<i64>,
    mtime: Option<i64>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<serde_json::Value>,
}

/// In-memory stamp store with explicit persistence points.
#[derive(Debug, Clone, Default)]
pub struct StampStore {
    entries: BTreeMap<String, StampRecord>,
    dirty: bool,
}

impl StampStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the document at `path`, or start empty if there is none.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "[STAMPS] No stamp store yet, starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let corrupt = |source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        };

        // Check the version before the entries so that documents written by
        // another layout are reported as incompatible rather than corrupt.
        let probe: VersionProbe = serde_json::from_str(&raw).map_err(corrupt)?;
        let found = match probe.version {
            Some(serde_json::Value::String(v)) => v,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if found != STAMP_STORE_VERSION {
            return Err(StoreError::IncompatibleStoreVersion {
                path: path.to_path_buf(),
                found,
                expected: STAMP_STORE_VERSION,
            });
        }

        let doc: Document = serde_json::from_str(&raw).map_err(corrupt)?;
        let entries = doc
            .entries
            .into_iter()
            .map(|(key, e)| {
                let record = StampRecord {
                    path: key.clone(),
                    url: e.url,
                    size: e.size,
                    mtime: e.mtime,
                };
                (key, record)
            })
            .collect::<BTreeMap<_, _>>();
        info!(path = %path.display(), entries = entries.len(), "[STAMPS] Loaded stamp store");
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    /// Write the whole document to `path` atomically and clear the dirty flag.
    pub fn save(&mut self, path: &Path) -> Result<(), StoreError> {
        let io = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(io)?;

        let doc = Document {
            version: STAMP_STORE_VERSION.to_string(),
            entries: self
                .entries
                .iter()
                .map(|(key, r)| {
                    (
                        key.clone(),
                        Entry {
                            url: r.url.clone(),
                            size: r.size,
                            mtime: r.mtime,
                        },
                    )
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&doc).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io)?;
        tmp.write_all(&json).map_err(io)?;
        tmp.as_file().sync_all().map_err(io)?;
        tmp.persist(path).map_err(|e| io(e.error))?;

        self.dirty = false;
        debug!(path = %path.display(), entries = self.entries.len(), "[STAMPS] Saved stamp store");
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&StampRecord> {
        self.entries.get(path)
    }

    /// Insert or replace the record for `record.path`.
    ///
    /// Setting a record identical to the stored one leaves the store clean.
    pub fn set(&mut self, record: StampRecord) {
        if self.entries.get(&record.path) == Some(&record) {
            return;
        }
        self.entries.insert(record.path.clone(), record);
        self.dirty = true;
    }

    pub fn remove(&mut self, path: &str) -> Option<StampRecord> {
        let removed = self.entries.remove(path);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// `true` when there are mutations not yet written by [`save`](Self::save).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &StampRecord> {
        self.entries.values()
    }
}
