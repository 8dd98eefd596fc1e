//! Map catalog snapshot
//!
//! The catalog is fetched by an external provider and handed to the core as
//! an immutable snapshot. Replacement is a whole-`Arc` swap, so readers never
//! see a partially updated list.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A playable map from the workshop collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapEntry {
    /// Workshop file id
    pub id: String,
    /// Human-readable title
    #[serde(rename = "name", alias = "display_name")]
    pub display_name: String,
}

impl MapEntry {
    /// Create a new map entry
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for MapEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Shared reference to a catalog snapshot
pub type SharedCatalog = Arc<MapCatalog>;

/// Immutable, id-unique list of playable maps
#[derive(Debug, Clone, Default)]
pub struct MapCatalog {
    maps: Vec<MapEntry>,
}

impl MapCatalog {
    /// Build a catalog, keeping the first entry for any duplicated id
    pub fn new(maps: Vec<MapEntry>) -> Self {
        let mut seen = HashSet::new();
        let maps = maps
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        Self { maps }
    }

    /// An empty catalog
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a shared reference to this catalog
    pub fn shared(self) -> SharedCatalog {
        Arc::new(self)
    }

    pub fn maps(&self) -> &[MapEntry] {
        &self.maps
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Look up a map by id
    pub fn get(&self, id: &str) -> Option<&MapEntry> {
        self.maps.iter().find(|m| m.id == id)
    }

    /// Maps whose display name contains `term`, case-insensitive
    pub fn search(&self, term: &str) -> Vec<MapEntry> {
        filter_by_name(self.maps.iter().cloned(), term)
    }

    /// Find the catalog entry for the map the server reports as loaded.
    ///
    /// Workshop maps carry their id in the server map path, so the id match
    /// is tried first; local maps fall back to a title match.
    pub fn resolve_loaded_map(&self, server_map_name: &str) -> Option<&MapEntry> {
        self.maps
            .iter()
            .find(|m| contains_ignore_case(server_map_name, &m.id))
            .or_else(|| {
                self.maps
                    .iter()
                    .find(|m| contains_ignore_case(server_map_name, &m.display_name))
            })
    }
}

/// Keep entries whose display name contains `term`, case-insensitive
pub fn filter_by_name(maps: impl IntoIterator<Item = MapEntry>, term: &str) -> Vec<MapEntry> {
    maps.into_iter()
        .filter(|m| contains_ignore_case(&m.display_name, term))
        .collect()
}

/// Case-insensitive substring test. An empty needle never matches.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}
