//! Persistent cache index.
//!
//! Maps `(class, identity)` to the path of a derived artifact. The whole
//! index is one JSON document; every save first copies the previous document
//! to a `.bak` sibling. Inserts only mark the index dirty, and
//! [`CacheIndex::flush`] (called periodically and at shutdown) persists it.

mod layout;
mod staging;

pub use layout::{artifact_path, identity_hash, CacheClass};
pub use staging::{persist_staging, staging_file};

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File name of the index document inside the cache directory.
pub const INDEX_FILE_NAME: &str = "cache_index.json";

type Entries = BTreeMap<String, BTreeMap<String, PathBuf>>;

struct IndexState {
    entries: Entries,
    dirty: bool,
}

/// Outcome of [`CacheIndex::purge_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Artifacts deleted from disk.
    pub removed: usize,
    /// Artifacts that could not be deleted.
    pub failed: usize,
}

/// Thread-safe, persistent `(class, identity) -> path` index.
pub struct CacheIndex {
    cache_dir: PathBuf,
    index_path: PathBuf,
    backup_path: PathBuf,
    state: Mutex<IndexState>,
    /// Serializes writers so backups and renames never interleave.
    save_lock: Mutex<()>,
}

impl CacheIndex {
    /// Open (or create) the index stored in `cache_dir`.
    ///
    /// A corrupt document is logged and replaced by an empty index.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;

        let index_path = cache_dir.join(INDEX_FILE_NAME);
        let backup_path = cache_dir.join(format!("{INDEX_FILE_NAME}.bak"));
        let entries = load_entries(&index_path);

        let total: usize = entries.values().map(BTreeMap::len).sum();
        info!(path = %index_path.display(), entries = total, "Opened cache index");

        Ok(Self {
            cache_dir,
            index_path,
            backup_path,
            state: Mutex::new(IndexState {
                entries,
                dirty: false,
            }),
            save_lock: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Return the artifact for `identity` if it is indexed and still on disk.
    ///
    /// Entries whose file has disappeared are dropped and reported as a miss.
    pub fn lookup(&self, class: CacheClass, identity: &str) -> Option<PathBuf> {
        let path = {
            let state = self.state.lock();
            state.entries.get(class.as_str())?.get(identity)?.clone()
        };

        if path.exists() {
            return Some(path);
        }

        let mut state = self.state.lock();
        if let Some(class_entries) = state.entries.get_mut(class.as_str()) {
            if class_entries.get(identity) == Some(&path) {
                class_entries.remove(identity);
                state.dirty = true;
                debug!(class = %class, identity, "Dropped stale cache entry");
            }
        }
        None
    }

    /// Record `path` as the artifact of `identity`. Re-inserting overwrites.
    pub fn insert(&self, class: CacheClass, identity: &str, path: impl Into<PathBuf>) {
        let mut state = self.state.lock();
        state
            .entries
            .entry(class.as_str().to_string())
            .or_default()
            .insert(identity.to_string(), path.into());
        state.dirty = true;
    }

    /// Number of indexed entries in `class`, stale or not.
    pub fn len(&self, class: CacheClass) -> usize {
        self.state
            .lock()
            .entries
            .get(class.as_str())
            .map_or(0, BTreeMap::len)
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Compute the artifact path for `identity`, creating its parent directories.
    pub fn artifact_path(&self, class: CacheClass, identity: &str, ext: &str) -> Result<PathBuf> {
        let path = artifact_path(&self.cache_dir, class, identity, ext);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Persist the whole index, keeping one rolling backup.
    pub fn save(&self) -> Result<()> {
        let _writer = self.save_lock.lock();

        let json = {
            let mut state = self.state.lock();
            let json = serde_json::to_string_pretty(&state.entries)?;
            state.dirty = false;
            json
        };

        if let Err(e) = self.write_document(&json) {
            self.state.lock().dirty = true;
            return Err(e);
        }

        debug!(path = %self.index_path.display(), "Saved cache index");
        Ok(())
    }

    fn write_document(&self, json: &str) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;

        if self.index_path.exists() {
            if let Err(e) = std::fs::copy(&self.index_path, &self.backup_path) {
                warn!("Failed to back up cache index: {}", e);
            }
        }

        let tmp_path = self.index_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.index_path)?;
        Ok(())
    }

    /// Save only if something changed since the last save.
    ///
    /// Returns whether a save happened.
    pub fn flush(&self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Delete every referenced artifact, then the index and its backup.
    ///
    /// Empty directories left behind in the cache directory are removed too.
    pub fn purge_all(&self) -> Result<PurgeReport> {
        let _writer = self.save_lock.lock();

        let entries = {
            let mut state = self.state.lock();
            state.dirty = false;
            std::mem::take(&mut state.entries)
        };

        let mut report = PurgeReport::default();
        for path in entries.values().flat_map(BTreeMap::values) {
            match std::fs::remove_file(path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        for path in [&self.index_path, &self.backup_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        remove_empty_dirs(&self.cache_dir);

        info!(
            removed = report.removed,
            failed = report.failed,
            "Purged cache"
        );
        Ok(report)
    }
}

fn load_entries(index_path: &Path) -> Entries {
    let mut entries = match std::fs::read_to_string(index_path) {
        Ok(content) => match serde_json::from_str::<Entries>(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cache index {} is corrupt ({}), starting fresh",
                    index_path.display(),
                    e
                );
                Entries::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
        Err(e) => {
            warn!(
                "Failed to read cache index {}: {}, starting fresh",
                index_path.display(),
                e
            );
            Entries::new()
        }
    };

    for class in CacheClass::ALL {
        entries.entry(class.as_str().to_string()).or_default();
    }
    entries
}

/// Remove empty directories below and including `root`, deepest first.
fn remove_empty_dirs(root: &Path) {
    for entry in WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        // Fails harmlessly on non-empty directories.
        let _ = std::fs::remove_dir(entry.path());
    }
}
