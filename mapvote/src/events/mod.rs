//! Vote lifecycle events
//!
//! Two streams leave the vote machine:
//!
//! 1. **Outbound effects** (`types.rs`): chat, center text, server commands
//!    and map changes, queued in the machine's outbox and drained by the
//!    runtime after every input.
//!
//! 2. **Lifecycle events** (`types.rs`, `bus.rs`): `VoteEvent` records
//!    broadcast to any number of observers (audit log, tests).
//!
//! ```text
//! ┌──────────────┐  outbox   ┌──────────────┐
//! │ VoteMachine  │──────────▶│   Runtime    │──▶ transport
//! │              │           └──────────────┘
//! │              │  publish  ┌──────────────┐
//! │              │──────────▶│  Event Bus   │──▶ subscribers
//! └──────────────┘           └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, SharedEventBus};
pub use types::{Outbound, Resolution, VoteEvent, VoteId, VoteTrigger};
