//! Map Vote Core Library
//!
//! This library provides the deterministic core of an end-of-map voting
//! system for a game server:
//! - Rock-the-vote (RTV) consensus with a population-relative threshold
//! - Map nominations through paginated per-player selection menus
//! - Scheduled, RTV and admin-forced ballots with timer or round closure
//! - Tallying, pending-map scheduling and admin map overrides
//!
//! No network I/O happens here. The runtime feeds chat lines, console
//! commands, game events and timer ticks into an [`EventRouter`], then
//! drains the queued [`Outbound`] effects.
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Instant;
//! use mapvote::{EventRouter, GameEvent, MapCatalog, ProcessContext, RecentMaps, VoteConfig, VoteMachine};
//!
//! let config = VoteConfig::default();
//! let history = RecentMaps::load(config.history_path(), config.recent_maps_count);
//! let machine = VoteMachine::new(
//!     config,
//!     ProcessContext::new().shared(),
//!     MapCatalog::empty().shared(),
//!     Box::new(history),
//! );
//! let mut router = EventRouter::new(machine);
//!
//! router.route_game_event(GameEvent::MapStart { map_name: "de_dust2".into() }, Instant::now());
//! router.route_chat(7, "!rtv", Instant::now());
//! for effect in router.drain_outbound() {
//!     // deliver to the game server
//! }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod machine;
pub mod nominations;
pub mod reminder;
pub mod router;
pub mod rtv;
pub mod selection;
pub mod selector;
pub mod store;
pub mod timer;

/// Stable participant identifier (the player's account id)
pub type ParticipantId = u64;

// Re-export catalog types
pub use catalog::{MapCatalog, MapEntry, SharedCatalog};

// Re-export configuration and error types
pub use config::VoteConfig;
pub use error::{ConfigError, ConfigResult, Denial, DenialResult, StoreError, StoreResult};

// Re-export the vote machine
pub use context::{ProcessContext, SharedProcessContext};
pub use machine::{OpenVote, Participant, VoteMachine, VoteMode, VoteOutcome, VotePhase};
pub use router::{ChatDisposition, Command, CommandSpec, EventRouter, GameEvent, COMMANDS};

// Re-export event types
pub use events::{EventBus, Outbound, Resolution, SharedEventBus, VoteEvent, VoteTrigger};

// Re-export persistence types
pub use store::{CatalogCache, PlayHistory, RecentMaps};
