//! Chat, console and game-event routing
//!
//! The [`EventRouter`] owns the [`VoteMachine`] and is the single entry
//! point for everything the transport delivers. Chat text is tried, in
//! order, as nomination menu input, forcemap menu input, a command, and
//! finally a ballot number while a vote is open.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Denial;
use crate::events::Outbound;
use crate::machine::VoteMachine;
use crate::selection::SelectionFlow;
use crate::ParticipantId;

/// A registered chat/console command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    /// Admin-only
    pub privileged: bool,
}

/// Every command the router understands
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "rtv",
        usage: "rtv",
        description: "Rock the vote to change the map",
        privileged: false,
    },
    CommandSpec {
        name: "nominate",
        usage: "nominate [search]",
        description: "Nominate a map for the next vote",
        privileged: false,
    },
    CommandSpec {
        name: "revote",
        usage: "revote",
        description: "Show the vote options again",
        privileged: false,
    },
    CommandSpec {
        name: "nextmap",
        usage: "nextmap",
        description: "Show the next map",
        privileged: false,
    },
    CommandSpec {
        name: "help",
        usage: "help",
        description: "List available commands",
        privileged: false,
    },
    CommandSpec {
        name: "forcemap",
        usage: "forcemap [search]",
        description: "Admin: change the map immediately",
        privileged: true,
    },
    CommandSpec {
        name: "forcevote",
        usage: "forcevote",
        description: "Admin: start a map vote",
        privileged: true,
    },
];

const HELP_HEADER: &str = "--- Map Vote Commands ---";

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Rtv,
    Nominate(Option<String>),
    Revote,
    NextMap,
    Forcemap(Option<String>),
    ForceVote,
    Help,
}

impl Command {
    /// Parse `[!|/]name [args]`, case-insensitive. `None` for anything that
    /// is not a registered command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = strip_marker(text.trim());
        let (name, args) = match text.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, Some(rest.trim())),
            None => (text, None),
        };
        let args = args.filter(|a| !a.is_empty()).map(String::from);

        let command = match name.to_ascii_lowercase().as_str() {
            "rtv" => Self::Rtv,
            "nominate" => Self::Nominate(args),
            "revote" => Self::Revote,
            "nextmap" => Self::NextMap,
            "forcemap" => Self::Forcemap(args),
            "forcevote" => Self::ForceVote,
            "help" => Self::Help,
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rtv => "rtv",
            Self::Nominate(_) => "nominate",
            Self::Revote => "revote",
            Self::NextMap => "nextmap",
            Self::Forcemap(_) => "forcemap",
            Self::ForceVote => "forcevote",
            Self::Help => "help",
        }
    }
}

fn strip_marker(text: &str) -> &str {
    text.strip_prefix(&['!', '/'][..]).unwrap_or(text)
}

/// Help text for a participant. Admins see privileged commands first.
pub fn help_lines(is_admin: bool) -> Vec<String> {
    let mut lines = vec![HELP_HEADER.to_string()];
    let mut admin: Vec<&CommandSpec> = COMMANDS.iter().filter(|c| c.privileged).collect();
    let mut player: Vec<&CommandSpec> = COMMANDS.iter().filter(|c| !c.privileged).collect();
    admin.sort_by_key(|c| c.name);
    player.sort_by_key(|c| c.name);

    let visible = if is_admin { admin } else { Vec::new() };
    lines.extend(
        visible
            .into_iter()
            .chain(player)
            .map(|c| format!("!{} - {}", c.usage, c.description)),
    );
    lines
}

/// What the transport should do with a chat line after routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatDisposition {
    /// Menu input or a ballot; suppress the line
    Handled,
    /// Commands and ordinary chat; show the line as usual
    PassThrough,
}

/// Game-side occurrences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    RoundStart { rounds_played: u32 },
    RoundEnd,
    MatchEnd,
    PlayerConnected { participant: ParticipantId, name: String },
    PlayerDisconnected { participant: ParticipantId },
    MapStart { map_name: String },
    Warmup { active: bool },
}

/// Single entry point into the vote core
#[derive(Debug)]
pub struct EventRouter {
    machine: VoteMachine,
}

impl EventRouter {
    pub fn new(machine: VoteMachine) -> Self {
        Self { machine }
    }

    pub fn machine(&self) -> &VoteMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut VoteMachine {
        &mut self.machine
    }

    pub fn into_machine(self) -> VoteMachine {
        self.machine
    }

    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        self.machine.drain_outbound()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.machine.next_deadline()
    }

    pub fn on_timer(&mut self, now: Instant) {
        self.machine.on_timer(now);
    }

    /// Route a player chat line
    pub fn route_chat(
        &mut self,
        participant: ParticipantId,
        text: &str,
        now: Instant,
    ) -> ChatDisposition {
        let text = strip_marker(text.trim());

        for flow in [SelectionFlow::Nominate, SelectionFlow::Forcemap] {
            if self.machine.has_session(flow, participant)
                && self.machine.selection_input(flow, participant, text)
            {
                return ChatDisposition::Handled;
            }
        }

        if let Some(command) = Command::parse(text) {
            self.dispatch(participant, command, now);
            return ChatDisposition::PassThrough;
        }

        if self.machine.phase().is_open() {
            if let Ok(key) = text.parse::<usize>() {
                match self.machine.cast_vote(participant, key) {
                    Ok(_) => return ChatDisposition::Handled,
                    Err(denial) => debug!(participant, %denial, "Ballot ignored"),
                }
            }
        }

        ChatDisposition::PassThrough
    }

    /// Route a console command. Returns whether it was recognized.
    pub fn route_command(&mut self, participant: ParticipantId, text: &str, now: Instant) -> bool {
        match Command::parse(text) {
            Some(command) => {
                self.dispatch(participant, command, now);
                true
            }
            None => false,
        }
    }

    /// Route a game event
    pub fn route_game_event(&mut self, event: GameEvent, now: Instant) {
        match event {
            GameEvent::RoundStart { rounds_played } => {
                self.machine.on_round_start(rounds_played, now);
            }
            GameEvent::RoundEnd => self.machine.on_round_end(),
            GameEvent::MatchEnd => {
                self.machine.apply_pending_on_match_end(now);
            }
            GameEvent::PlayerConnected { participant, name } => {
                self.machine.participant_connected(participant, name)
            }
            GameEvent::PlayerDisconnected { participant } => {
                self.machine.participant_disconnected(participant)
            }
            GameEvent::MapStart { map_name } => self.machine.reset_for_new_map(map_name, now),
            GameEvent::Warmup { active } => self.machine.set_warmup(active),
        }
    }

    fn dispatch(&mut self, participant: ParticipantId, command: Command, now: Instant) {
        debug!(participant, command = command.name(), "Command");
        let result: Result<(), Denial> = match command {
            Command::Rtv => self.machine.attempt_rtv(participant, now).map(|_| ()),
            Command::Nominate(search) => self.machine.attempt_nominate(participant, search.as_deref()),
            Command::Revote => self.machine.revote(participant),
            Command::NextMap => self.machine.nextmap().map(|_| ()),
            Command::Forcemap(search) => self.machine.attempt_forcemap(participant, search.as_deref()),
            Command::ForceVote => self.machine.attempt_force_vote(participant, now),
            Command::Help => {
                let lines = help_lines(self.machine.is_admin(participant));
                self.machine.chat_lines(participant, lines);
                Ok(())
            }
        };
        if let Err(denial) = result {
            self.machine.deny(participant, &denial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("rtv"), Some(Command::Rtv));
        assert_eq!(Command::parse("!RTV"), Some(Command::Rtv));
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(
            Command::parse("!nominate  dust "),
            Some(Command::Nominate(Some("dust".to_string())))
        );
        assert_eq!(Command::parse("nominate"), Some(Command::Nominate(None)));
        assert_eq!(
            Command::parse("forcemap mirage night"),
            Some(Command::Forcemap(Some("mirage night".to_string())))
        );
        assert_eq!(Command::parse("rtvx"), None);
        assert_eq!(Command::parse("3"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_help_hides_admin_commands() {
        let player = help_lines(false);
        assert_eq!(player[0], HELP_HEADER);
        assert!(player.iter().all(|l| !l.contains("Admin:")));
        assert_eq!(player.len(), 6);

        let admin = help_lines(true);
        assert_eq!(admin.len(), 8);
        assert!(admin[1].starts_with("!forcemap"));
        assert!(admin[2].starts_with("!forcevote"));
        assert!(admin[3].starts_with("!help"));
    }

    #[test]
    fn test_registry_covers_every_command() {
        for spec in COMMANDS {
            let parsed = Command::parse(spec.name).unwrap();
            assert_eq!(parsed.name(), spec.name);
        }
    }

    #[test]
    fn test_game_event_wire_shape() {
        let event: GameEvent =
            serde_json::from_str(r#"{"type":"round_start","rounds_played":9}"#).unwrap();
        assert_eq!(event, GameEvent::RoundStart { rounds_played: 9 });
        let event: GameEvent = serde_json::from_str(r#"{"type":"round_end"}"#).unwrap();
        assert_eq!(event, GameEvent::RoundEnd);
    }
}
