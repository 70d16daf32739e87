//! Typed commands validated from raw client messages.
//!
//! A `ClientMessage` only guarantees well-formed JSON; every field may be
//! missing. `Command::from_message` turns it into a command whose fields are
//! all present and in range, or `None`, which the server drops without
//! answering.

use crate::registry::normalize_code;
use crate::utils::clean_text;
use shared::{ClientMessage, Difficulty, Place, Slot, Team, MAX_CHAT_LEN};
use std::fmt;

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_AVATAR_BYTES: usize = 64 * 1024;

const ROUND_MS_RANGE: std::ops::RangeInclusive<u64> = 3_000..=120_000;
const TOTAL_ROUNDS_RANGE: std::ops::RangeInclusive<u64> = 1..=50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateRoom {
        room_name: String,
        player_name: String,
        avatar: Option<String>,
    },
    JoinRoom {
        code: String,
        name: String,
        avatar: Option<String>,
    },
    JoinRandom {
        name: String,
        avatar: Option<String>,
    },
    Sit {
        code: String,
        team: Team,
        slot: Slot,
    },
    Ready {
        code: String,
        ready: bool,
    },
    Settings {
        code: String,
        difficulty: Option<Difficulty>,
        round_ms: Option<u32>,
        total_rounds: Option<u32>,
    },
    Start {
        code: String,
    },
    Digit {
        code: String,
        place: Place,
        digit: u8,
    },
    Submit {
        code: String,
        tens: u8,
        ones: u8,
    },
    Chat {
        code: String,
        text: String,
    },
    Leave {
        code: String,
    },
    /// Transport closed; never sent by a client.
    Disconnect,
}

impl Command {
    pub fn from_message(msg: ClientMessage) -> Option<Command> {
        let command = match msg {
            ClientMessage::CreateRoom(p) => Command::CreateRoom {
                room_name: name_or(p.room_name.or(p.name), "Unnamed Room"),
                player_name: name_or(p.player_name, "Host"),
                avatar: avatar(p.avatar_data),
            },
            // An absent code still reaches the handler so the sender gets
            // "room not found".
            ClientMessage::JoinRoom(p) => Command::JoinRoom {
                code: normalize_code(p.room_code.as_deref().unwrap_or_default()),
                name: name_or(p.name, "Player"),
                avatar: avatar(p.avatar_data),
            },
            ClientMessage::JoinRandom(p) => Command::JoinRandom {
                name: name_or(p.name, "Guest"),
                avatar: avatar(p.avatar_data),
            },
            ClientMessage::Sit(p) => Command::Sit {
                code: code(p.room_code)?,
                team: p.team?,
                slot: p.slot?,
            },
            ClientMessage::Ready(p) => Command::Ready {
                code: code(p.room_code)?,
                ready: p.ready.unwrap_or(false),
            },
            ClientMessage::Settings(p) => Command::Settings {
                code: code(p.room_code)?,
                difficulty: p.diff,
                round_ms: in_range(p.round_ms, &ROUND_MS_RANGE),
                total_rounds: in_range(p.total_rounds, &TOTAL_ROUNDS_RANGE),
            },
            ClientMessage::Start(p) => Command::Start {
                code: code(p.room_code)?,
            },
            ClientMessage::Digit(p) => {
                let place = p.place.filter(|place| place.is_player_writable())?;
                Command::Digit {
                    code: code(p.room_code)?,
                    place,
                    digit: digit(p.digit)?,
                }
            }
            ClientMessage::Submit(p) => Command::Submit {
                code: code(p.room_code)?,
                tens: digit(p.tens)?,
                ones: digit(p.ones)?,
            },
            ClientMessage::Chat(p) => {
                let text = clean_text(p.text.as_deref()?, MAX_CHAT_LEN);
                if text.is_empty() {
                    return None;
                }
                Command::Chat {
                    code: code(p.room_code)?,
                    text,
                }
            }
            ClientMessage::Leave(p) => Command::Leave {
                code: code(p.room_code)?,
            },
        };
        Some(command)
    }

    /// Event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateRoom { .. } => "room:create",
            Command::JoinRoom { .. } => "room:join",
            Command::JoinRandom { .. } => "room:joinRandom",
            Command::Sit { .. } => "team:sit",
            Command::Ready { .. } => "player:ready",
            Command::Settings { .. } => "room:settings",
            Command::Start { .. } => "game:start",
            Command::Digit { .. } => "team:digit",
            Command::Submit { .. } => "team:submit",
            Command::Chat { .. } => "chat:send",
            Command::Leave { .. } => "room:leave",
            Command::Disconnect => "disconnect",
        }
    }
}

fn code(raw: Option<String>) -> Option<String> {
    let code = normalize_code(&raw?);
    (!code.is_empty()).then_some(code)
}

fn digit(raw: Option<u8>) -> Option<u8> {
    raw.filter(|d| *d <= 9)
}

fn in_range(raw: Option<u64>, range: &std::ops::RangeInclusive<u64>) -> Option<u32> {
    raw.filter(|v| range.contains(v)).and_then(|v| u32::try_from(v).ok())
}

fn name_or(raw: Option<String>, fallback: &str) -> String {
    let name = clean_text(raw.as_deref().unwrap_or_default(), MAX_NAME_LEN);
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

fn avatar(raw: Option<String>) -> Option<String> {
    raw.filter(|data| !data.is_empty() && data.len() <= MAX_AVATAR_BYTES)
}

/// Validation failures that are reported back to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    RoomNotFound,
    SlotTaken,
    NotReady,
    NotHost,
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            RoomError::RoomNotFound => "Room not found.",
            RoomError::SlotTaken => "That slot is taken.",
            RoomError::NotReady => "Need 4 seated players and everyone ready.",
            RoomError::NotHost => "Only the host can do that.",
        };
        f.write_str(message)
    }
}

impl std::error::Error for RoomError {}
