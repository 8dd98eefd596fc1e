//! Error types for the vote core
//!
//! Two families live here:
//! - [`Denial`]: user-visible, non-fatal refusals. The `Display` text is the
//!   chat message sent back to the participant; state is never changed.
//! - [`StoreError`] / [`ConfigError`]: collaborator failures that are logged
//!   (or, for config at startup, surfaced to the binary).

use std::path::PathBuf;

use thiserror::Error;

/// A refused command or operation. Always leaves state unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("You do not have permission to use this command.")]
    PermissionDenied,

    #[error("This is not available during warmup.")]
    Warmup,

    #[error("RTV is currently disabled.")]
    RtvDisabled,

    #[error("You have already rocked the vote.")]
    AlreadyRocked,

    #[error("A map vote has already started or finished.")]
    VoteNotIdle,

    #[error("A vote is already in progress.")]
    VoteInProgress,

    #[error("Cannot start vote after match end.")]
    MatchEnded,

    #[error("There is no vote currently in progress.")]
    NoActiveVote,

    #[error("That is not a valid vote option.")]
    InvalidOption,

    #[error("Nominations are currently disabled.")]
    NominationsDisabled,

    #[error("Voting has already finished.")]
    VotingClosed,

    #[error("The nomination list is full!")]
    NominationListFull,

    #[error("That map was just nominated by someone else.")]
    AlreadyNominatedMap,

    #[error("You have already nominated a map.")]
    AlreadyNominatedThisCycle,

    #[error("{}", no_maps_message(.search))]
    NoMapsAvailable { search: Option<String> },

    #[error("The next map has not been decided yet.")]
    NextMapUndecided,
}

fn no_maps_message(search: &Option<String>) -> String {
    match search {
        Some(term) => format!("No maps found matching: {}", term),
        None => "No maps available.".to_string(),
    }
}

/// Result type for operations that may be refused
pub type DenialResult<T> = Result<T, Denial>;

/// Error type for the JSON-backed history and catalog stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported config format: {path} (expected .toml or .json)")]
    UnsupportedFormat { path: PathBuf },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
