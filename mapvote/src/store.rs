//! JSON-file stores for play history and the catalog cache
//!
//! Both files are plain JSON arrays. Writes go to a sibling temp file and
//! are renamed into place so a crash never leaves a truncated file behind.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::catalog::MapEntry;
use crate::error::{StoreError, StoreResult};

/// Read-and-record access to recently played maps
pub trait PlayHistory: Send {
    /// Whether the map was among the last N played
    fn is_recent(&self, map_id: &str) -> bool;

    /// Record the map as just played
    fn record_played(&mut self, map_id: &str);
}

/// Bounded, ordered list of recently played map ids (oldest first)
#[derive(Debug, Clone)]
pub struct RecentMaps {
    ids: VecDeque<String>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl RecentMaps {
    /// In-memory history with no backing file
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            ids: VecDeque::new(),
            capacity,
            path: None,
        }
    }

    /// Load history from `path`. A missing or corrupt file yields an empty
    /// history; the path is kept so later records are saved.
    pub fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let ids: Vec<String> = match read_json(&path) {
            Ok(Some(ids)) => ids,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable map history");
                Vec::new()
            }
        };

        let mut history = Self {
            ids: ids.into(),
            capacity,
            path: Some(path),
        };
        history.truncate();
        history
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn truncate(&mut self) {
        while self.ids.len() > self.capacity {
            self.ids.pop_front();
        }
    }

    /// Persist to the backing file, if any
    pub fn save(&self) -> StoreResult<()> {
        match &self.path {
            Some(path) => write_json(path, &self.ids),
            None => Ok(()),
        }
    }
}

impl PlayHistory for RecentMaps {
    fn is_recent(&self, map_id: &str) -> bool {
        self.ids.iter().any(|id| id == map_id)
    }

    fn record_played(&mut self, map_id: &str) {
        self.ids.retain(|id| id != map_id);
        self.ids.push_back(map_id.to_string());
        self.truncate();

        if let Err(e) = self.save() {
            warn!(error = %e, "Failed to save map history");
        } else {
            debug!(map_id, entries = self.ids.len(), "Map history updated");
        }
    }
}

/// Durable copy of the last fetched catalog
#[derive(Debug, Clone)]
pub struct CatalogCache {
    path: PathBuf,
}

impl CatalogCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached maps. `Ok(None)` when no cache exists yet.
    pub fn load(&self) -> StoreResult<Option<Vec<MapEntry>>> {
        read_json(&self.path)
    }

    pub fn save(&self, maps: &[MapEntry]) -> StoreResult<()> {
        write_json(&self.path, maps)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }
    let json = serde_json::to_string(value).map_err(|e| StoreError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}
