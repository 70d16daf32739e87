//! Room aggregate: membership, seating, match configuration and match state.

use crate::board::DigitBoard;
use crate::question::Question;
use shared::{
    ConnectionId, Difficulty, Phase, PerTeam, PlayerResult, PublicPlayer, PublicQuestion,
    PublicRoom, PublicState, PublicTeam, Slot, Team, TeamStats, Winner, MAX_PLAYERS,
    TARGET_CORRECT,
};

/// A connection seated or waiting in a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: ConnectionId,
    pub name: String,
    pub avatar_data: Option<String>,
    pub team: Option<Team>,
    pub slot: Option<Slot>,
    pub ready: bool,
    pub score: u32,
}

impl Player {
    pub fn new(id: ConnectionId, name: String, avatar_data: Option<String>) -> Self {
        Self {
            id,
            name,
            avatar_data,
            team: None,
            slot: None,
            ready: false,
            score: 0,
        }
    }

    /// `(team, slot)` when the player holds a seat.
    pub fn seat(&self) -> Option<(Team, Slot)> {
        match (self.team, self.slot) {
            (Some(team), Some(slot)) => Some((team, slot)),
            _ => None,
        }
    }

    fn public(&self) -> PublicPlayer {
        PublicPlayer {
            id: self.id,
            name: self.name.clone(),
            ready: self.ready,
            score: self.score,
            team: self.team,
            slot: self.slot,
            avatar_data: self.avatar_data.clone(),
        }
    }
}

/// The question a team is currently answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamQuestion {
    pub question: Question,
    pub round: u32,
}

impl TeamQuestion {
    pub fn answer(&self) -> u32 {
        self.question.answer
    }

    fn public(&self) -> PublicQuestion {
        PublicQuestion {
            a: self.question.a,
            b: self.question.b,
            op: self.question.op,
            round: self.round,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    pub difficulty: Difficulty,
    pub target_correct: u32,
    /// Legacy per-round countdown; unused by the per-team race.
    pub round_ms: u32,
    /// Legacy round cap; unused by the per-team race.
    pub total_rounds: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Easy,
            target_correct: TARGET_CORRECT,
            round_ms: 12_000,
            total_rounds: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchState {
    pub phase: Phase,
    /// Incremented on every match start; stale timers compare against it.
    pub match_no: u32,
    pub match_start_at: Option<u64>,
    pub questions: PerTeam<Option<TeamQuestion>>,
    pub boards: PerTeam<Option<DigitBoard>>,
    pub stats: PerTeam<TeamStats>,
    pub scores: PerTeam<u32>,
    pub rounds: PerTeam<u32>,
    pub winner: Option<Winner>,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub code: String,
    pub name: String,
    pub host: ConnectionId,
    pub config: MatchConfig,
    pub state: MatchState,
    /// Registry insertion sequence, used for matchmaking order.
    pub created_seq: u64,
    /// Members in join order.
    players: Vec<Player>,
}

impl Room {
    pub fn new(code: String, name: String, host: ConnectionId, created_seq: u64) -> Self {
        Self {
            code,
            name,
            host,
            config: MatchConfig::default(),
            state: MatchState::default(),
            created_seq,
            players: Vec::new(),
        }
    }

    /// Adds a member, or resets the record of one that joins again.
    pub fn add_player(&mut self, player: Player) {
        match self.players.iter_mut().find(|p| p.id == player.id) {
            Some(existing) => *existing = player,
            None => self.players.push(player),
        }
    }

    pub fn remove_player(&mut self, id: ConnectionId) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(index))
    }

    pub fn player(&self, id: ConnectionId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: ConnectionId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.iter_mut()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.player(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_host(&self, id: ConnectionId) -> bool {
        self.host == id
    }

    /// Lobby rooms with a free place are eligible for random matchmaking.
    pub fn is_joinable(&self) -> bool {
        self.state.phase == Phase::Lobby && self.players.len() < MAX_PLAYERS
    }

    /// Who, other than `except`, already holds `(team, slot)`.
    pub fn seat_holder(&self, team: Team, slot: Slot, except: ConnectionId) -> Option<ConnectionId> {
        self.players
            .iter()
            .find(|p| p.id != except && p.seat() == Some((team, slot)))
            .map(|p| p.id)
    }

    /// Connection ids of the players on `team`.
    pub fn team_members(&self, team: Team) -> Vec<ConnectionId> {
        self.players
            .iter()
            .filter(|p| p.team == Some(team))
            .map(|p| p.id)
            .collect()
    }

    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.players.iter().map(|p| p.id).collect()
    }

    /// True iff exactly four players are seated, two per team on distinct
    /// slots, and all four are ready.
    pub fn all_ready(&self) -> bool {
        let seated: Vec<(Team, Slot, bool)> = self
            .players
            .iter()
            .filter_map(|p| p.seat().map(|(team, slot)| (team, slot, p.ready)))
            .collect();
        if seated.len() != MAX_PLAYERS {
            return false;
        }

        let every_seat_filled = Team::ALL.iter().all(|team| {
            Slot::ALL.iter().all(|slot| {
                seated
                    .iter()
                    .filter(|(t, s, _)| t == team && s == slot)
                    .count()
                    == 1
            })
        });

        every_seat_filled && seated.iter().all(|(_, _, ready)| *ready)
    }

    /// Hands the host role to the earliest remaining member. Returns the new
    /// host, or `None` when the room has no members left.
    pub fn reassign_host(&mut self) -> Option<ConnectionId> {
        let next = self.players.first()?.id;
        self.host = next;
        Some(next)
    }

    pub fn question(&self, team: Team) -> Option<&TeamQuestion> {
        self.state.questions[team].as_ref()
    }

    pub fn board(&self, team: Team) -> Option<&DigitBoard> {
        self.state.boards[team].as_ref()
    }

    /// Per-player snapshot for the match-ended event.
    pub fn results(&self) -> Vec<PlayerResult> {
        self.players
            .iter()
            .map(|p| PlayerResult {
                id: p.id,
                name: p.name.clone(),
                score: p.score,
                team: p.team,
            })
            .collect()
    }

    /// Public projection; no team answer is ever included.
    pub fn public(&self) -> PublicRoom {
        let players: Vec<PublicPlayer> = self.players.iter().map(Player::public).collect();
        let team = |team: Team| {
            let members: Vec<PublicPlayer> = players
                .iter()
                .filter(|p| p.team == Some(team))
                .cloned()
                .collect();
            PublicTeam {
                members,
                score: self.state.scores[team],
            }
        };
        let teams = PerTeam::new(team(Team::A), team(Team::B));

        let state = &self.state;
        let question = |team: Team| state.questions[team].as_ref().map(TeamQuestion::public);
        let board = |team: Team| state.boards[team].as_ref().map(DigitBoard::view);

        PublicRoom {
            room_code: self.code.clone(),
            name: self.name.clone(),
            host_id: self.host,
            state: PublicState {
                mode: "2v2".to_string(),
                phase: state.phase,
                diff: self.config.difficulty,
                round_ms: self.config.round_ms,
                total_rounds: self.config.total_rounds,
                target_correct: self.config.target_correct,
                match_start_at: state.match_start_at,
                team_stats: state.stats,
                team_scores: state.scores,
                team_questions: PerTeam::new(question(Team::A), question(Team::B)),
                team_digits: PerTeam::new(board(Team::A), board(Team::B)),
                team_rounds: state.rounds,
                winner: state.winner,
            },
            players,
            teams,
        }
    }
}
