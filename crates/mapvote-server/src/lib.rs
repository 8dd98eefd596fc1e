//! Map Vote Server
//!
//! Runtime around the `mapvote` core: the Steam workshop catalog fetch, the
//! JSON-lines transport, and the event loop that owns the vote machine.

pub mod service;
pub mod transport;
pub mod workshop;

pub use service::{build_router, spawn_audit_log, ServiceInput, VoteService};
pub use transport::{Inbound, JsonLineSink, PlayerLine};
pub use workshop::{spawn_refresh, CatalogSource, SteamWorkshopSource, WorkshopError};
