//! JSON-lines transport
//!
//! The game-side bridge writes one JSON object per line on our stdin and
//! reads effects as JSON lines from our stdout. Both directions are tagged
//! by `"type"`.

use std::time::Instant;

use mapvote::{ChatDisposition, EventRouter, GameEvent, Outbound, ParticipantId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::service::ServiceInput;

/// Console command the game server uses to load a workshop map
pub const CHANGE_MAP_COMMAND: &str = "host_workshop_map";

/// Text typed by a player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerLine {
    Chat {
        participant: ParticipantId,
        text: String,
    },
    Command {
        participant: ParticipantId,
        text: String,
    },
}

/// One inbound line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Player(PlayerLine),
    Game(GameEvent),
}

impl Inbound {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Feed this line into the router. Chat lines report whether they
    /// were consumed.
    pub fn apply(self, router: &mut EventRouter, now: Instant) -> Option<ChatDisposition> {
        match self {
            Inbound::Player(PlayerLine::Chat { participant, text }) => {
                Some(router.route_chat(participant, &text, now))
            }
            Inbound::Player(PlayerLine::Command { participant, text }) => {
                if !router.route_command(participant, &text, now) {
                    debug!(participant, text = %text, "Unknown console command");
                }
                None
            }
            Inbound::Game(event) => {
                router.route_game_event(event, now);
                None
            }
        }
    }
}

/// Encode an effect as one JSON line (without the newline). Map changes
/// carry the console command that performs them.
pub fn encode_outbound(effect: &Outbound) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(effect)?;
    if let (Outbound::ChangeMap { map_id }, Some(object)) = (effect, value.as_object_mut()) {
        object.insert(
            "command".to_string(),
            serde_json::Value::String(format!("{CHANGE_MAP_COMMAND} {map_id}")),
        );
    }
    serde_json::to_string(&value)
}

/// Writes effects as JSON lines
#[derive(Debug)]
pub struct JsonLineSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub async fn send(&mut self, effects: &[Outbound]) -> std::io::Result<()> {
        if effects.is_empty() {
            return Ok(());
        }
        for effect in effects {
            let line = encode_outbound(effect)?;
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await
    }
}

/// Read JSON lines from `reader` until EOF, forwarding each parsed line.
/// Malformed lines are logged and skipped.
pub fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::Sender<ServiceInput>,
) -> tokio::task::JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match Inbound::parse(line) {
                Ok(inbound) => {
                    if tx.send(ServiceInput::Inbound(inbound)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, line, "Skipping malformed transport line"),
            }
        }
        debug!("Transport input closed");
        Ok(())
    })
}
