//! Wire protocol and public room projection shared by the match server and
//! its clients.
//!
//! Every message travels as one JSON text frame shaped as
//! `{"event": "<name>", "data": {...}}`. Inbound payload fields are all
//! optional so that a malformed or partial message deserializes into
//! something the server can inspect and reject quietly, instead of tearing
//! down the connection.

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Number of correct rounds a team needs to win a match.
pub const TARGET_CORRECT: u32 = 10;
/// Seats in a 2v2 match, also the occupancy cap for random matchmaking.
pub const MAX_PLAYERS: usize = 4;
/// Chat messages are truncated to this many characters.
pub const MAX_CHAT_LEN: usize = 300;
pub const ROOM_CODE_LEN: usize = 5;
/// 32 characters with no 0/O or 1/I look-alikes.
pub const ROOM_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Transport-level connection id, reused as the player id while the
/// connection lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::A, Team::B];

    pub fn other(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::A => f.write_str("A"),
            Team::B => f.write_str("B"),
        }
    }
}

/// Team-relative seat. Slot 0 owns the tens digit, slot 1 owns the ones digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Slot {
    Zero,
    One,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Zero, Slot::One];

    /// The only place a player in this slot may write.
    pub fn owned_place(self) -> Place {
        match self {
            Slot::Zero => Place::Tens,
            Slot::One => Place::Ones,
        }
    }
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Slot::Zero),
            1 => Ok(Slot::One),
            other => Err(format!("slot must be 0 or 1, got {}", other)),
        }
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        match slot {
            Slot::Zero => 0,
            Slot::One => 1,
        }
    }
}

/// Decimal place on a team's digit board, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Place {
    Thousands,
    Hundreds,
    Tens,
    Ones,
}

impl Place {
    pub const ALL: [Place; 4] = [Place::Thousands, Place::Hundreds, Place::Tens, Place::Ones];

    /// Position in a `[thousands, hundreds, tens, ones]` array.
    pub fn index(self) -> usize {
        match self {
            Place::Thousands => 0,
            Place::Hundreds => 1,
            Place::Tens => 2,
            Place::Ones => 3,
        }
    }

    /// Thousands and hundreds are only ever filled by the server.
    pub fn is_player_writable(self) -> bool {
        matches!(self, Place::Tens | Place::Ones)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    #[serde(rename = "med", alias = "medium")]
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => f.write_str("easy"),
            Difficulty::Medium => f.write_str("med"),
            Difficulty::Hard => f.write_str("hard"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "×")]
    Multiply,
    #[serde(rename = "÷")]
    Divide,
}

impl Operator {
    /// Evaluates `a op b`, `None` on underflow or inexact division.
    pub fn apply(self, a: u32, b: u32) -> Option<u32> {
        match self {
            Operator::Add => a.checked_add(b),
            Operator::Subtract => a.checked_sub(b),
            Operator::Multiply => a.checked_mul(b),
            Operator::Divide => {
                if b != 0 && a % b == 0 {
                    Some(a / b)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "×",
            Operator::Divide => "÷",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Lobby,
    Playing,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    A,
    B,
    #[serde(rename = "tie")]
    Tie,
}

impl From<Team> for Winner {
    fn from(team: Team) -> Self {
        match team {
            Team::A => Winner::A,
            Team::B => Winner::B,
        }
    }
}

/// One value per team, serialized as `{"A": .., "B": ..}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerTeam<T> {
    #[serde(rename = "A")]
    pub a: T,
    #[serde(rename = "B")]
    pub b: T,
}

impl<T> PerTeam<T> {
    pub fn new(a: T, b: T) -> Self {
        Self { a, b }
    }
}

impl<T> Index<Team> for PerTeam<T> {
    type Output = T;

    fn index(&self, team: Team) -> &T {
        match team {
            Team::A => &self.a,
            Team::B => &self.b,
        }
    }
}

impl<T> IndexMut<Team> for PerTeam<T> {
    fn index_mut(&mut self, team: Team) -> &mut T {
        match team {
            Team::A => &mut self.a,
            Team::B => &mut self.b,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStats {
    pub correct_count: u32,
    /// Milliseconds from match start until `correct_count` first reached the target.
    pub time_to_target: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPlayer {
    pub id: ConnectionId,
    pub name: String,
    pub ready: bool,
    pub score: u32,
    pub team: Option<Team>,
    pub slot: Option<Slot>,
    pub avatar_data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicTeam {
    pub members: Vec<PublicPlayer>,
    pub score: u32,
}

/// A team's question with the answer withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub a: u32,
    pub b: u32,
    pub op: Operator,
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPrompt {
    pub a: u32,
    pub b: u32,
    pub op: Operator,
}

/// Digit board exactly as stored, flattened for clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitBoardView {
    pub thousands: Option<u8>,
    pub hundreds: Option<u8>,
    pub tens: Option<u8>,
    pub ones: Option<u8>,
    pub who_thousands: Option<ConnectionId>,
    pub who_hundreds: Option<ConnectionId>,
    pub who_tens: Option<ConnectionId>,
    pub who_ones: Option<ConnectionId>,
    pub locked_thousands: bool,
    pub locked_hundreds: bool,
    pub locked_tens: bool,
    pub locked_ones: bool,
    pub overall_locked: bool,
    pub submitted_value: Option<u32>,
    pub submitted_by: Option<ConnectionId>,
    pub submitted_at: Option<u64>,
    pub answer_length: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicState {
    pub mode: String,
    pub phase: Phase,
    pub diff: Difficulty,
    pub round_ms: u32,
    pub total_rounds: u32,
    pub target_correct: u32,
    pub match_start_at: Option<u64>,
    pub team_stats: PerTeam<TeamStats>,
    pub team_scores: PerTeam<u32>,
    pub team_questions: PerTeam<Option<PublicQuestion>>,
    pub team_digits: PerTeam<Option<DigitBoardView>>,
    pub team_rounds: PerTeam<u32>,
    pub winner: Option<Winner>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoom {
    pub room_code: String,
    pub name: String,
    pub host_id: ConnectionId,
    pub state: PublicState,
    pub players: Vec<PublicPlayer>,
    pub teams: PerTeam<PublicTeam>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub id: ConnectionId,
    pub name: String,
    pub score: u32,
    pub team: Option<Team>,
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateRoomPayload {
    pub name: Option<String>,
    pub room_name: Option<String>,
    pub player_name: Option<String>,
    pub avatar_data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_code: Option<String>,
    pub name: Option<String>,
    pub avatar_data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinRandomPayload {
    pub name: Option<String>,
    pub avatar_data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SitPayload {
    pub room_code: Option<String>,
    pub team: Option<Team>,
    pub slot: Option<Slot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadyPayload {
    pub room_code: Option<String>,
    pub ready: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsPayload {
    pub room_code: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub diff: Option<Difficulty>,
    #[serde(deserialize_with = "lenient")]
    pub round_ms: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    pub total_rounds: Option<u64>,
}

/// Reads a field that may hold anything; values of the wrong type or shape
/// become `None` instead of failing the whole payload.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Field<T> {
        Valid(T),
        Invalid(#[allow(dead_code)] IgnoredAny),
    }

    Ok(match Field::<T>::deserialize(deserializer)? {
        Field::Valid(value) => Some(value),
        Field::Invalid(_) => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomCodePayload {
    pub room_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DigitPayload {
    pub room_code: Option<String>,
    pub place: Option<Place>,
    pub digit: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmitPayload {
    pub room_code: Option<String>,
    pub tens: Option<u8>,
    pub ones: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatPayload {
    pub room_code: Option<String>,
    pub text: Option<String>,
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "room:create")]
    CreateRoom(CreateRoomPayload),
    #[serde(rename = "room:join")]
    JoinRoom(JoinRoomPayload),
    #[serde(rename = "room:joinRandom")]
    JoinRandom(JoinRandomPayload),
    #[serde(rename = "team:sit")]
    Sit(SitPayload),
    #[serde(rename = "player:ready")]
    Ready(ReadyPayload),
    #[serde(rename = "room:settings")]
    Settings(SettingsPayload),
    #[serde(rename = "game:start")]
    Start(RoomCodePayload),
    #[serde(rename = "team:digit")]
    Digit(DigitPayload),
    #[serde(rename = "team:submit")]
    Submit(SubmitPayload),
    #[serde(rename = "chat:send")]
    Chat(ChatPayload),
    #[serde(rename = "room:leave")]
    Leave(RoomCodePayload),
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Messages the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "room:joined", rename_all = "camelCase")]
    Joined {
        room_code: String,
        self_id: ConnectionId,
    },
    #[serde(rename = "room:update")]
    RoomUpdate(Box<PublicRoom>),
    #[serde(rename = "room:error")]
    Error { message: String },
    #[serde(rename = "game:roundStart", rename_all = "camelCase")]
    RoundStart {
        round: u32,
        question: QuestionPrompt,
        team_rounds: PerTeam<u32>,
        answer_length: u8,
        no_timer: bool,
    },
    #[serde(rename = "game:teamRoundEnd", rename_all = "camelCase")]
    TeamRoundEnd {
        team: Team,
        correct: u32,
        built: u32,
        is_correct: bool,
        round: u32,
        team_stats: PerTeam<TeamStats>,
    },
    #[serde(rename = "game:ended", rename_all = "camelCase")]
    Ended {
        results: Vec<PlayerResult>,
        team_stats: PerTeam<TeamStats>,
        winner: Winner,
        team_rounds: PerTeam<u32>,
    },
    #[serde(rename = "chat:new")]
    Chat { from: String, text: String, at: u64 },
}

impl ServerMessage {
    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "room:joined",
            ServerMessage::RoomUpdate(_) => "room:update",
            ServerMessage::Error { .. } => "room:error",
            ServerMessage::RoundStart { .. } => "game:roundStart",
            ServerMessage::TeamRoundEnd { .. } => "game:teamRoundEnd",
            ServerMessage::Ended { .. } => "game:ended",
            ServerMessage::Chat { .. } => "chat:new",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_team_other() {
        assert_eq!(Team::A.other(), Team::B);
        assert_eq!(Team::B.other(), Team::A);
    }

    #[test]
    fn test_slot_owns_one_place() {
        assert_eq!(Slot::Zero.owned_place(), Place::Tens);
        assert_eq!(Slot::One.owned_place(), Place::Ones);
    }

    #[test]
    fn test_place_writability() {
        assert!(!Place::Thousands.is_player_writable());
        assert!(!Place::Hundreds.is_player_writable());
        assert!(Place::Tens.is_player_writable());
        assert!(Place::Ones.is_player_writable());
    }

    #[test]
    fn test_room_code_alphabet_is_unambiguous() {
        assert_eq!(ROOM_CODE_ALPHABET.len(), 32);
        for banned in [b'0', b'O', b'1', b'I'] {
            assert!(!ROOM_CODE_ALPHABET.contains(&banned));
        }
    }

    #[test]
    fn test_operator_apply() {
        assert_eq!(Operator::Add.apply(40, 2), Some(42));
        assert_eq!(Operator::Subtract.apply(2, 40), None);
        assert_eq!(Operator::Multiply.apply(6, 7), Some(42));
        assert_eq!(Operator::Divide.apply(84, 2), Some(42));
        assert_eq!(Operator::Divide.apply(85, 2), None);
        assert_eq!(Operator::Divide.apply(1, 0), None);
    }

    #[test]
    fn test_per_team_indexing() {
        let mut rounds = PerTeam::new(1u32, 5u32);
        rounds[Team::B] += 1;
        assert_eq!(rounds[Team::A], 1);
        assert_eq!(rounds[Team::B], 6);
        assert_eq!(serde_json::to_value(rounds).unwrap(), json!({"A": 1, "B": 6}));
    }

    #[test]
    fn test_parse_digit_message() {
        let raw = json!({
            "event": "team:digit",
            "data": {"roomCode": "abcde", "place": "tens", "digit": 4}
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Digit(DigitPayload {
                room_code: Some("abcde".to_string()),
                place: Some(Place::Tens),
                digit: Some(4),
            })
        );
    }

    #[test]
    fn test_parse_partial_payload() {
        let raw = json!({"event": "team:sit", "data": {"team": "B"}});
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::Sit(payload) => {
                assert_eq!(payload.team, Some(Team::B));
                assert_eq!(payload.slot, None);
                assert_eq!(payload.room_code, None);
            }
            _ => panic!("Wrong message type after deserialization"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_slot_and_unknown_event() {
        let bad_slot = json!({"event": "team:sit", "data": {"team": "A", "slot": 2}});
        assert!(serde_json::from_value::<ClientMessage>(bad_slot).is_err());

        let unknown = json!({"event": "admin:nuke", "data": {}});
        assert!(serde_json::from_value::<ClientMessage>(unknown).is_err());
    }

    #[test]
    fn test_settings_bad_field_keeps_the_rest() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "room:settings",
            "data": {"roomCode": "ABCDE", "diff": "hard", "roundMs": -5, "totalRounds": "lots"}
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Settings(SettingsPayload {
                room_code: Some("ABCDE".to_string()),
                diff: Some(Difficulty::Hard),
                round_ms: None,
                total_rounds: None,
            })
        );

        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "room:settings",
            "data": {"roomCode": "ABCDE", "diff": "extreme", "roundMs": 20000, "totalRounds": null}
        }))
        .unwrap();
        match msg {
            ClientMessage::Settings(p) => {
                assert_eq!(p.diff, None);
                assert_eq!(p.round_ms, Some(20_000));
                assert_eq!(p.total_rounds, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_difficulty_wire_names() {
        let med: Difficulty = serde_json::from_value(json!("med")).unwrap();
        let alias: Difficulty = serde_json::from_value(json!("medium")).unwrap();
        assert_eq!(med, Difficulty::Medium);
        assert_eq!(alias, Difficulty::Medium);
        assert_eq!(serde_json::to_value(Difficulty::Hard).unwrap(), json!("hard"));
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::Joined {
            room_code: "ABCDE".to_string(),
            self_id: ConnectionId(7),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"event": "room:joined", "data": {"roomCode": "ABCDE", "selfId": 7}})
        );
        assert_eq!(msg.event_name(), "room:joined");

        let end = ServerMessage::TeamRoundEnd {
            team: Team::A,
            correct: 42,
            built: 42,
            is_correct: true,
            round: 3,
            team_stats: PerTeam::default(),
        };
        let value = serde_json::to_value(&end).unwrap();
        assert_eq!(value["event"], "game:teamRoundEnd");
        assert_eq!(value["data"]["isCorrect"], true);
        assert_eq!(value["data"]["teamStats"]["A"]["correctCount"], 0);
        assert!(value["data"]["teamStats"]["B"]["timeToTarget"].is_null());
    }

    #[test]
    fn test_winner_wire_names() {
        assert_eq!(serde_json::to_value(Winner::Tie).unwrap(), json!("tie"));
        assert_eq!(serde_json::to_value(Winner::from(Team::B)).unwrap(), json!("B"));
    }
}
