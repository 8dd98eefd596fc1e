//! Vote lifecycle events and outbound effects
//!
//! [`VoteEvent`]s are observability records published on the bus.
//! [`Outbound`] values are the effects the runtime must carry out: chat,
//! center text, server commands and the map change itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::MapEntry;
use crate::ParticipantId;

/// Unique identifier for one vote
pub type VoteId = String;

/// What started a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteTrigger {
    /// Round counter reached `vote_round`
    ScheduledRound,
    /// RTV threshold reached
    Rtv,
    /// Admin `forcevote`
    ForcedByAdmin,
}

impl std::fmt::Display for VoteTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteTrigger::ScheduledRound => write!(f, "scheduled_round"),
            VoteTrigger::Rtv => write!(f, "rtv"),
            VoteTrigger::ForcedByAdmin => write!(f, "forced_by_admin"),
        }
    }
}

/// How a vote's winner was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Forced re-vote with no ballots; the earlier winner stands
    KeptPrevious,
    /// No ballots; an option was drawn uniformly
    Random,
    /// Largest ballot group, ties to the lowest option key
    Majority { votes: usize },
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::KeptPrevious => write!(f, "kept_previous"),
            Resolution::Random => write!(f, "random"),
            Resolution::Majority { votes } => write!(f, "majority({})", votes),
        }
    }
}

/// All vote lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoteEvent {
    /// A ballot opened
    VoteStarted {
        vote_id: VoteId,
        trigger: VoteTrigger,
        options: Vec<MapEntry>,
        timestamp: DateTime<Utc>,
    },

    /// A participant cast or changed a ballot
    BallotCast {
        vote_id: VoteId,
        participant: ParticipantId,
        option: usize,
        map_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A ballot closed and the pending map was set
    VoteEnded {
        vote_id: VoteId,
        winner: MapEntry,
        resolution: Resolution,
        ballots: usize,
        timestamp: DateTime<Utc>,
    },

    /// An RTV request was accepted
    RtvProgress {
        participant: ParticipantId,
        count: usize,
        needed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A map was added to the nomination list
    Nominated {
        participant: ParticipantId,
        map: MapEntry,
        timestamp: DateTime<Utc>,
    },

    /// The pending map will be applied after a delay
    MapChangeScheduled {
        map: MapEntry,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An admin switched the map directly
    MapForced {
        participant: ParticipantId,
        map: MapEntry,
        timestamp: DateTime<Utc>,
    },

    /// A new map loaded and all vote state was cleared
    MapReset {
        map_name: String,
        timestamp: DateTime<Utc>,
    },
}

impl VoteEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            VoteEvent::VoteStarted { timestamp, .. } => *timestamp,
            VoteEvent::BallotCast { timestamp, .. } => *timestamp,
            VoteEvent::VoteEnded { timestamp, .. } => *timestamp,
            VoteEvent::RtvProgress { timestamp, .. } => *timestamp,
            VoteEvent::Nominated { timestamp, .. } => *timestamp,
            VoteEvent::MapChangeScheduled { timestamp, .. } => *timestamp,
            VoteEvent::MapForced { timestamp, .. } => *timestamp,
            VoteEvent::MapReset { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            VoteEvent::VoteStarted { .. } => "vote_started",
            VoteEvent::BallotCast { .. } => "ballot_cast",
            VoteEvent::VoteEnded { .. } => "vote_ended",
            VoteEvent::RtvProgress { .. } => "rtv_progress",
            VoteEvent::Nominated { .. } => "nominated",
            VoteEvent::MapChangeScheduled { .. } => "map_change_scheduled",
            VoteEvent::MapForced { .. } => "map_forced",
            VoteEvent::MapReset { .. } => "map_reset",
        }
    }

    /// Get the vote ID if this event belongs to a ballot
    pub fn vote_id(&self) -> Option<&str> {
        match self {
            VoteEvent::VoteStarted { vote_id, .. } => Some(vote_id),
            VoteEvent::BallotCast { vote_id, .. } => Some(vote_id),
            VoteEvent::VoteEnded { vote_id, .. } => Some(vote_id),
            _ => None,
        }
    }

    /// Create a new unique vote ID
    pub fn new_vote_id() -> VoteId {
        uuid::Uuid::new_v4().to_string()
    }
}

/// An effect for the runtime to carry out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Chat line to everyone
    ChatAll { message: String },
    /// Chat line to one participant
    Chat {
        participant: ParticipantId,
        message: String,
    },
    /// Center-screen text to one participant
    Center {
        participant: ParticipantId,
        message: String,
    },
    /// Raw server console command
    ServerCommand { command: String },
    /// Switch to a workshop map
    ChangeMap { map_id: String },
}

impl Outbound {
    pub fn chat_all(message: impl Into<String>) -> Self {
        Outbound::ChatAll {
            message: message.into(),
        }
    }

    pub fn chat(participant: ParticipantId, message: impl Into<String>) -> Self {
        Outbound::Chat {
            participant,
            message: message.into(),
        }
    }

    pub fn center(participant: ParticipantId, message: impl Into<String>) -> Self {
        Outbound::Center {
            participant,
            message: message.into(),
        }
    }

    pub fn server_command(command: impl Into<String>) -> Self {
        Outbound::ServerCommand {
            command: command.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = VoteEvent::VoteEnded {
            vote_id: "v-1".to_string(),
            winner: MapEntry::new("123", "Dust"),
            resolution: Resolution::Majority { votes: 3 },
            ballots: 5,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "vote_ended");
        assert_eq!(json["winner"]["name"], "Dust");
        assert_eq!(json["resolution"]["kind"], "majority");
        assert_eq!(json["resolution"]["votes"], 3);

        let back: VoteEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_type(), "vote_ended");
        assert_eq!(back.vote_id(), Some("v-1"));
    }

    #[test]
    fn test_outbound_wire_shape() {
        let json = serde_json::to_string(&Outbound::ChangeMap {
            map_id: "3070".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"change_map","map_id":"3070"}"#);

        let json = serde_json::to_string(&Outbound::center(7, "VOTE NOW!")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"center","participant":7,"message":"VOTE NOW!"}"#
        );
    }

    #[test]
    fn test_vote_ids_are_unique() {
        assert_ne!(VoteEvent::new_vote_id(), VoteEvent::new_vote_id());
    }
}
