//! Vote configuration
//!
//! Loaded from a TOML or JSON file, then overridden from the environment.
//! Every field has a default so a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Top-level vote configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteConfig {
    /// Steam Web API key used by the workshop catalog fetch
    pub steam_api_key: String,
    /// Workshop collection holding the playable maps
    pub collection_id: String,
    /// Round number whose start triggers the scheduled vote
    pub vote_round: u32,
    pub enable_rtv: bool,
    pub enable_nominate: bool,
    /// Entries per selection-menu page
    pub nominate_per_page: usize,
    /// Fraction of connected players needed to rock the vote
    pub rtv_percentage: f64,
    /// Ballot size, also the nomination capacity
    pub vote_options_count: usize,
    pub vote_reminder_enabled: bool,
    /// Seconds between chat reminders while a vote is open
    pub vote_reminder_interval: f64,
    pub server_name: String,
    /// Periodically broadcast the map being played
    pub show_map_message: bool,
    /// Seconds between "currently playing" broadcasts
    pub map_message_interval: f64,
    /// Keep recently played maps off the ballot
    pub enable_recent_maps: bool,
    pub recent_maps_count: usize,
    /// Round ends a scheduled vote stays open for
    pub vote_open_for_rounds: u32,
    /// Participant ids allowed to use forcemap and forcevote
    pub admins: Vec<u64>,
    /// Seconds an RTV or override vote stays open
    pub vote_duration_secs: u32,
    /// Seconds between the match-end announcement and the map change
    pub map_change_delay_secs: f64,
    /// Switch to a random catalog map on the first map load of the process
    pub randomize_startup_map: bool,
    /// Directory for `recent_maps.json` and `map_cache.json`
    pub state_dir: PathBuf,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            steam_api_key: String::new(),
            collection_id: String::new(),
            vote_round: 10,
            enable_rtv: true,
            enable_nominate: true,
            nominate_per_page: 6,
            rtv_percentage: 0.60,
            vote_options_count: 8,
            vote_reminder_enabled: true,
            vote_reminder_interval: 30.0,
            server_name: "My CS2 Server".to_string(),
            show_map_message: true,
            map_message_interval: 300.0,
            enable_recent_maps: true,
            recent_maps_count: 5,
            vote_open_for_rounds: 1,
            admins: Vec::new(),
            vote_duration_secs: 30,
            map_change_delay_secs: 8.0,
            randomize_startup_map: false,
            state_dir: PathBuf::from("."),
        }
    }
}

impl VoteConfig {
    /// Load from a `.toml` or `.json` file, normalize, and apply env overrides
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?,
            Some("json") => serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        config.apply_env();
        config.normalize();
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config.normalize();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("MAPVOTE_STEAM_API_KEY") {
            self.steam_api_key = key;
        }
        if let Ok(id) = std::env::var("MAPVOTE_COLLECTION_ID") {
            self.collection_id = id;
        }
        if let Ok(dir) = std::env::var("MAPVOTE_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
    }

    /// Clamp values into their usable ranges
    pub fn normalize(&mut self) {
        self.vote_options_count = self.vote_options_count.clamp(2, 10);
        if self.nominate_per_page < 1 {
            self.nominate_per_page = 6;
        }
        self.vote_open_for_rounds = self.vote_open_for_rounds.max(1);
        if self.rtv_percentage.is_nan() || self.rtv_percentage <= 0.0 {
            self.rtv_percentage = 0.60;
        }
        self.rtv_percentage = self.rtv_percentage.min(1.0);
        if self.vote_duration_secs == 0 {
            self.vote_duration_secs = 30;
        }
    }

    /// Whether the participant is on the admin allow-list
    pub fn is_admin(&self, participant: u64) -> bool {
        self.admins.contains(&participant)
    }

    /// Whether the workshop fetch has what it needs
    pub fn has_workshop_credentials(&self) -> bool {
        !self.steam_api_key.is_empty() && !self.collection_id.is_empty()
    }

    pub fn vote_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.vote_duration_secs))
    }

    pub fn reminder_interval(&self) -> Duration {
        secs_f64(self.vote_reminder_interval)
    }

    pub fn map_message_interval(&self) -> Duration {
        secs_f64(self.map_message_interval)
    }

    pub fn map_change_delay(&self) -> Duration {
        secs_f64(self.map_change_delay_secs)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("recent_maps.json")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.state_dir.join("map_cache.json")
    }
}

fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
}
