//! Match coordinator: the single entry point for every room mutation.
//!
//! `Coordinator::handle` applies one validated command and `Coordinator::fire`
//! runs one deferred task. Both return `Effects` (messages to send, tasks to
//! schedule, rooms that no longer exist) instead of touching the network, so
//! the whole state machine can be driven synchronously from tests.
//!
//! ## Per-team race
//!
//! Each team answers its own question and advances on its own clock. When a
//! team's board locks (both tens and ones set, or an explicit submit) the
//! round is finalized after a short grace delay so that the locking
//! `room:update` reaches clients first. After a non-winning round the next
//! question for that team follows after another delay.
//!
//! ## Deferred tasks
//!
//! Every task records the match number and the team round it was issued for.
//! When it fires, the room must still exist, be `playing`, and be on that same
//! match and round; otherwise the task does nothing. A disconnect that empties
//! the room, a win by the other team, or a rematch all make pending tasks
//! harmless.

use crate::board::{DigitBoard, WriteOutcome};
use crate::command::{Command, RoomError};
use crate::gateway::Outbound;
use crate::question;
use crate::registry::RoomRegistry;
use crate::room::{MatchState, Player, Room, TeamQuestion};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    ConnectionId, Difficulty, Phase, PerTeam, Place, ServerMessage, Slot, Team, TeamStats, Winner,
    TARGET_CORRECT,
};
use std::cmp::Ordering;
use std::time::Duration;

/// Grace delays and the win threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTiming {
    /// Between a board locking and its round being scored.
    pub finalize_delay: Duration,
    /// Between a scored round and the team's next question.
    pub next_round_delay: Duration,
    pub target_correct: u32,
}

impl Default for MatchTiming {
    fn default() -> Self {
        Self {
            finalize_delay: Duration::from_millis(150),
            next_round_delay: Duration::from_millis(800),
            target_correct: TARGET_CORRECT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    FinalizeRound,
    NextRound,
}

/// Deferred work for one team of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub room: String,
    pub team: Team,
    pub match_no: u32,
    pub round: u32,
    pub kind: TaskKind,
    pub delay: Duration,
}

/// Everything a command or task asks the outside world to do.
#[derive(Debug, Default)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    pub scheduled: Vec<ScheduledTask>,
    /// Rooms destroyed by this step; their pending tasks can be cancelled.
    pub closed_rooms: Vec<String>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.scheduled.is_empty() && self.closed_rooms.is_empty()
    }

    /// Messages addressed to `id`, in emission order.
    pub fn messages_for(&self, id: ConnectionId) -> Vec<&ServerMessage> {
        self.outbound
            .iter()
            .filter(|out| out.recipients.contains(&id))
            .map(|out| &out.message)
            .collect()
    }

    fn send(&mut self, outbound: Outbound) {
        self.outbound.push(outbound);
    }

    fn schedule(&mut self, room: &Room, team: Team, kind: TaskKind, delay: Duration) {
        self.scheduled.push(ScheduledTask {
            room: room.code.clone(),
            team,
            match_no: room.state.match_no,
            round: room.state.rounds[team],
            kind,
            delay,
        });
    }
}

pub struct Coordinator {
    registry: RoomRegistry,
    timing: MatchTiming,
    rng: StdRng,
}

impl Coordinator {
    pub fn new(timing: MatchTiming) -> Self {
        Self {
            registry: RoomRegistry::new(),
            timing,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic room codes and questions, for tests and replays.
    pub fn with_seed(timing: MatchTiming, seed: u64) -> Self {
        Self {
            registry: RoomRegistry::with_rng(StdRng::seed_from_u64(seed)),
            timing,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RoomRegistry {
        &mut self.registry
    }

    pub fn timing(&self) -> &MatchTiming {
        &self.timing
    }

    /// Applies one command from `conn`. Invalid commands yield no effects,
    /// except for the few validation failures reported as `room:error`.
    pub fn handle(&mut self, conn: ConnectionId, command: Command, now: u64) -> Effects {
        let mut fx = Effects::default();
        let event = command.name();

        match command {
            Command::CreateRoom {
                room_name,
                player_name,
                avatar,
            } => {
                let code = self
                    .registry
                    .create(room_name, Player::new(conn, player_name, avatar));
                self.announce_join(&code, conn, &mut fx);
            }
            Command::JoinRoom { code, name, avatar } => {
                match self.registry.get_mut(&code) {
                    Some(room) => room.add_player(Player::new(conn, name, avatar)),
                    None => {
                        fx.send(Outbound::error(conn, RoomError::RoomNotFound));
                        return fx;
                    }
                }
                self.announce_join(&code, conn, &mut fx);
            }
            Command::JoinRandom { name, avatar } => {
                let player = Player::new(conn, name, avatar);
                let code = match self.registry.find_joinable().map(str::to_string) {
                    Some(code) => {
                        if let Some(room) = self.registry.get_mut(&code) {
                            room.add_player(player);
                        }
                        code
                    }
                    None => self.registry.create("Random Match".to_string(), player),
                };
                info!("Connection {} matched into room {}", conn, code);
                self.announce_join(&code, conn, &mut fx);
            }
            Command::Sit { code, team, slot } => self.sit(conn, &code, team, slot, &mut fx),
            Command::Ready { code, ready } => {
                if let Some(room) = self.registry.get_mut(&code) {
                    if let Some(player) = room.player_mut(conn) {
                        player.ready = ready;
                        fx.send(Outbound::room_update(room));
                    }
                }
            }
            Command::Settings {
                code,
                difficulty,
                round_ms,
                total_rounds,
            } => self.update_settings(conn, &code, difficulty, round_ms, total_rounds, &mut fx),
            Command::Start { code } => self.start_match(conn, &code, now, &mut fx),
            Command::Digit { code, place, digit } => {
                self.write_digit(conn, &code, place, digit, now, &mut fx)
            }
            Command::Submit { code, tens, ones } => {
                self.submit(conn, &code, tens, ones, now, &mut fx)
            }
            Command::Chat { code, text } => {
                if let Some(room) = self.registry.get(&code) {
                    if let Some(player) = room.player(conn) {
                        let message = ServerMessage::Chat {
                            from: player.name.clone(),
                            text,
                            at: now,
                        };
                        fx.send(Outbound::to_room(room, message));
                    }
                }
            }
            Command::Leave { code } => self.remove_member(&code, conn, &mut fx),
            Command::Disconnect => {
                for code in self.registry.rooms_of(conn) {
                    self.remove_member(&code, conn, &mut fx);
                }
            }
        }

        if fx.is_empty() {
            debug!("Dropped {} from {}", event, conn);
        }
        fx
    }

    /// Runs a deferred task. Stale tasks are ignored.
    pub fn fire(&mut self, task: &ScheduledTask, now: u64) -> Effects {
        let mut fx = Effects::default();

        let Some(room) = self.registry.get_mut(&task.room) else {
            debug!("{:?} for vanished room {}", task.kind, task.room);
            return fx;
        };
        let state = &room.state;
        if state.phase != Phase::Playing
            || state.match_no != task.match_no
            || state.rounds[task.team] != task.round
        {
            debug!(
                "Stale {:?} for room {} team {} round {}",
                task.kind, task.room, task.team, task.round
            );
            return fx;
        }

        match task.kind {
            TaskKind::FinalizeRound => finalize_round(room, task.team, now, &self.timing, &mut fx),
            TaskKind::NextRound => start_rounds(room, &[task.team], &mut self.rng, &mut fx),
        }
        fx
    }

    fn announce_join(&self, code: &str, conn: ConnectionId, fx: &mut Effects) {
        if let Some(room) = self.registry.get(code) {
            fx.send(Outbound::to_connection(
                conn,
                ServerMessage::Joined {
                    room_code: room.code.clone(),
                    self_id: conn,
                },
            ));
            fx.send(Outbound::room_update(room));
        }
    }

    fn sit(&mut self, conn: ConnectionId, code: &str, team: Team, slot: Slot, fx: &mut Effects) {
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        if !room.contains(conn) {
            return;
        }
        if room.seat_holder(team, slot, conn).is_some() {
            fx.send(Outbound::error(conn, RoomError::SlotTaken));
            return;
        }
        if let Some(player) = room.player_mut(conn) {
            player.team = Some(team);
            player.slot = Some(slot);
            player.ready = false;
        }
        fx.send(Outbound::room_update(room));
    }

    fn update_settings(
        &mut self,
        conn: ConnectionId,
        code: &str,
        difficulty: Option<Difficulty>,
        round_ms: Option<u32>,
        total_rounds: Option<u32>,
        fx: &mut Effects,
    ) {
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        if !room.is_host(conn) {
            fx.send(Outbound::error(conn, RoomError::NotHost));
            return;
        }
        if room.state.phase == Phase::Playing {
            return;
        }

        let config = &mut room.config;
        config.difficulty = difficulty.unwrap_or(config.difficulty);
        config.round_ms = round_ms.unwrap_or(config.round_ms);
        config.total_rounds = total_rounds.unwrap_or(config.total_rounds);
        fx.send(Outbound::room_update(room));
    }

    fn start_match(&mut self, conn: ConnectionId, code: &str, now: u64, fx: &mut Effects) {
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        if !room.is_host(conn) {
            fx.send(Outbound::error(conn, RoomError::NotHost));
            return;
        }
        if room.state.phase == Phase::Playing {
            return;
        }
        if !room.all_ready() {
            fx.send(Outbound::error(conn, RoomError::NotReady));
            return;
        }

        for player in room.players_mut().filter(|p| p.seat().is_some()) {
            player.score = 0;
            player.ready = false;
        }
        room.config.target_correct = self.timing.target_correct;
        room.state = MatchState {
            phase: Phase::Playing,
            match_no: room.state.match_no + 1,
            match_start_at: Some(now),
            ..MatchState::default()
        };
        info!(
            "Room {} match {} started ({}, first to {})",
            room.code, room.state.match_no, room.config.difficulty, room.config.target_correct
        );

        start_rounds(room, &Team::ALL, &mut self.rng, fx);
    }

    fn write_digit(
        &mut self,
        conn: ConnectionId,
        code: &str,
        place: Place,
        digit: u8,
        now: u64,
        fx: &mut Effects,
    ) {
        let delay = self.timing.finalize_delay;
        let Some((room, team, answer)) = self.playing_seat(conn, code) else {
            return;
        };
        let Some((_, slot)) = room.player(conn).and_then(Player::seat) else {
            return;
        };
        if slot.owned_place() != place {
            return;
        }
        let Some(board) = room.state.boards[team].as_mut() else {
            return;
        };

        match board.write(place, digit, conn, answer, now) {
            WriteOutcome::Rejected => {}
            WriteOutcome::Accepted => fx.send(Outbound::room_update(room)),
            WriteOutcome::Completed => {
                fx.send(Outbound::room_update(room));
                fx.schedule(room, team, TaskKind::FinalizeRound, delay);
            }
        }
    }

    fn submit(
        &mut self,
        conn: ConnectionId,
        code: &str,
        tens: u8,
        ones: u8,
        now: u64,
        fx: &mut Effects,
    ) {
        let delay = self.timing.finalize_delay;
        let Some((room, team, answer)) = self.playing_seat(conn, code) else {
            return;
        };
        let Some(board) = room.state.boards[team].as_mut() else {
            return;
        };

        if board.submit(tens, ones, conn, answer, now) {
            fx.send(Outbound::room_update(room));
            fx.schedule(room, team, TaskKind::FinalizeRound, delay);
        }
    }

    /// The room, the sender's team and that team's answer, if the room is
    /// mid-match and the sender holds a seat.
    fn playing_seat(&mut self, conn: ConnectionId, code: &str) -> Option<(&mut Room, Team, u32)> {
        let room = self.registry.get_mut(code)?;
        if room.state.phase != Phase::Playing {
            return None;
        }
        let (team, _) = room.player(conn)?.seat()?;
        let answer = room.question(team)?.answer();
        Some((room, team, answer))
    }

    fn remove_member(&mut self, code: &str, conn: ConnectionId, fx: &mut Effects) {
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        if room.remove_player(conn).is_none() {
            return;
        }

        if room.is_empty() {
            self.registry.remove(code);
            fx.closed_rooms.push(code.to_string());
            return;
        }
        if room.is_host(conn) {
            if let Some(host) = room.reassign_host() {
                info!("Room {} host passed to {}", code, host);
            }
        }
        fx.send(Outbound::room_update(room));
    }
}

/// Deals a fresh question and board to each of `teams`, then announces the
/// new rounds: one `room:update` for everyone and a `game:roundStart` for each
/// team's own players.
fn start_rounds(room: &mut Room, teams: &[Team], rng: &mut StdRng, fx: &mut Effects) {
    let difficulty = room.config.difficulty;
    for &team in teams {
        let question = question::generate(difficulty, rng);
        room.state.rounds[team] += 1;
        room.state.questions[team] = Some(TeamQuestion {
            question,
            round: room.state.rounds[team],
        });
        room.state.boards[team] = Some(DigitBoard::new(question.answer, difficulty));
        debug!(
            "Room {} team {} round {}: {} {} {}",
            room.code, team, room.state.rounds[team], question.a, question.op, question.b
        );
    }

    fx.send(Outbound::room_update(room));

    for &team in teams {
        let (Some(question), Some(board)) = (room.question(team), room.board(team)) else {
            continue;
        };
        let message = ServerMessage::RoundStart {
            round: room.state.rounds[team],
            question: question.question.prompt(),
            team_rounds: room.state.rounds,
            answer_length: board.answer_length,
            no_timer: true,
        };
        fx.send(Outbound::to_team(room, team, message));
    }
}

/// Scores `team`'s locked board, reports the result, then either ends the
/// match or queues the team's next round.
fn finalize_round(room: &mut Room, team: Team, now: u64, timing: &MatchTiming, fx: &mut Effects) {
    let Some(result) = score_round(room, team, now) else {
        return;
    };
    fx.send(Outbound::to_team(room, team, result));
    fx.send(Outbound::room_update(room));

    let target = room.config.target_correct;
    if room.state.stats[team].correct_count < target {
        fx.schedule(room, team, TaskKind::NextRound, timing.next_round_delay);
        return;
    }

    // The other team may have locked its board before this one but still be
    // waiting out its grace delay. Settle it now so the tie-break sees both.
    let other = team.other();
    if room.state.stats[other].correct_count < target {
        if let Some(result) = score_round(room, other, now) {
            fx.send(Outbound::to_team(room, other, result));
        }
    }

    let winner = decide_winner(&room.state.stats, target).unwrap_or(Winner::from(team));
    end_match(room, winner, fx);
}

/// Marks a locked, unscored board as finalized and updates the team's stats.
/// Returns the `game:teamRoundEnd` message, or `None` if there is nothing to
/// score.
fn score_round(room: &mut Room, team: Team, now: u64) -> Option<ServerMessage> {
    let answer = room.question(team)?.answer();
    let start = room.state.match_start_at.unwrap_or(now);
    let target = room.config.target_correct;

    let board = room.state.boards[team].as_mut()?;
    if !board.overall_locked || board.finalized {
        return None;
    }
    board.finalized = true;
    let built = board.built_value(answer);
    let locked_at = board.locked_at.unwrap_or(now);
    let is_correct = built == answer;

    if is_correct {
        let stats = &mut room.state.stats[team];
        stats.correct_count += 1;
        if stats.correct_count >= target && stats.time_to_target.is_none() {
            stats.time_to_target = Some(locked_at.saturating_sub(start));
        }
        room.state.scores[team] += 1;
        for player in room.players_mut().filter(|p| p.team == Some(team) && p.slot.is_some()) {
            player.score += 1;
        }
    }

    let round = room.state.rounds[team];
    debug!(
        "Room {} team {} round {}: built {} vs {} ({})",
        room.code,
        team,
        round,
        built,
        answer,
        if is_correct { "correct" } else { "wrong" }
    );

    Some(ServerMessage::TeamRoundEnd {
        team,
        correct: answer,
        built,
        is_correct,
        round,
        team_stats: room.state.stats,
    })
}

fn end_match(room: &mut Room, winner: Winner, fx: &mut Effects) {
    room.state.phase = Phase::Ended;
    room.state.winner = Some(winner);
    info!(
        "Room {} match {} ended, winner {:?} (A {:?}, B {:?})",
        room.code, room.state.match_no, winner, room.state.stats.a, room.state.stats.b
    );

    fx.send(Outbound::room_update(room));
    let message = ServerMessage::Ended {
        results: room.results(),
        team_stats: room.state.stats,
        winner,
        team_rounds: room.state.rounds,
    };
    fx.send(Outbound::to_room(room, message));
}

/// Match outcome once at least one team reached `target`. When both did, the
/// smaller `time_to_target` wins and equal times tie.
pub fn decide_winner(stats: &PerTeam<TeamStats>, target: u32) -> Option<Winner> {
    let reached = |team: Team| stats[team].correct_count >= target;
    match (reached(Team::A), reached(Team::B)) {
        (false, false) => None,
        (true, false) => Some(Winner::A),
        (false, true) => Some(Winner::B),
        (true, true) => {
            let a = stats.a.time_to_target.unwrap_or(u64::MAX);
            let b = stats.b.time_to_target.unwrap_or(u64::MAX);
            Some(match a.cmp(&b) {
                Ordering::Less => Winner::A,
                Ordering::Greater => Winner::B,
                Ordering::Equal => Winner::Tie,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::Question;
    use shared::Operator;

    const HOST: ConnectionId = ConnectionId(1);
    const A0: ConnectionId = ConnectionId(1);
    const B0: ConnectionId = ConnectionId(2);
    const A1: ConnectionId = ConnectionId(3);
    const B1: ConnectionId = ConnectionId(4);

    fn coordinator() -> Coordinator {
        Coordinator::with_seed(MatchTiming::default(), 42)
    }

    fn create(c: &mut Coordinator, conn: ConnectionId) -> String {
        let fx = c.handle(
            conn,
            Command::CreateRoom {
                room_name: "Test".into(),
                player_name: format!("p{}", conn.0),
                avatar: None,
            },
            0,
        );
        match fx.messages_for(conn).first() {
            Some(ServerMessage::Joined { room_code, .. }) => room_code.clone(),
            other => panic!("expected room:joined, got {:?}", other),
        }
    }

    fn join(c: &mut Coordinator, conn: ConnectionId, code: &str) -> Effects {
        c.handle(
            conn,
            Command::JoinRoom {
                code: code.into(),
                name: format!("p{}", conn.0),
                avatar: None,
            },
            0,
        )
    }

    fn sit(c: &mut Coordinator, conn: ConnectionId, code: &str, team: Team, slot: Slot) -> Effects {
        c.handle(
            conn,
            Command::Sit {
                code: code.into(),
                team,
                slot,
            },
            0,
        )
    }

    fn ready(c: &mut Coordinator, conn: ConnectionId, code: &str) {
        c.handle(
            conn,
            Command::Ready {
                code: code.into(),
                ready: true,
            },
            0,
        );
    }

    fn start(c: &mut Coordinator, conn: ConnectionId, code: &str, now: u64) -> Effects {
        c.handle(conn, Command::Start { code: code.into() }, now)
    }

    fn digit(c: &mut Coordinator, conn: ConnectionId, code: &str, place: Place, d: u8, now: u64) -> Effects {
        c.handle(
            conn,
            Command::Digit {
                code: code.into(),
                place,
                digit: d,
            },
            now,
        )
    }

    /// Four seated, ready players in a fresh room; not started.
    fn ready_room(c: &mut Coordinator) -> String {
        let code = create(c, A0);
        join(c, B0, &code);
        join(c, A1, &code);
        join(c, B1, &code);
        sit(c, A0, &code, Team::A, Slot::Zero);
        sit(c, B0, &code, Team::B, Slot::Zero);
        sit(c, A1, &code, Team::A, Slot::One);
        sit(c, B1, &code, Team::B, Slot::One);
        for conn in [A0, B0, A1, B1] {
            ready(c, conn, &code);
        }
        code
    }

    fn started_room(c: &mut Coordinator, now: u64) -> String {
        let code = ready_room(c);
        start(c, HOST, &code, now);
        code
    }

    /// Replaces `team`'s current question so tests know the answer.
    fn force_answer(c: &mut Coordinator, code: &str, team: Team, answer: u32, difficulty: Difficulty) {
        let room = c.registry_mut().get_mut(code).unwrap();
        room.config.difficulty = difficulty;
        let round = room.state.rounds[team];
        room.state.questions[team] = Some(TeamQuestion {
            question: Question {
                a: answer,
                b: 0,
                op: Operator::Add,
                answer,
            },
            round,
        });
        room.state.boards[team] = Some(DigitBoard::new(answer, difficulty));
    }

    fn room<'a>(c: &'a Coordinator, code: &str) -> &'a Room {
        c.registry().get(code).unwrap()
    }

    fn finalize_task(fx: &Effects) -> ScheduledTask {
        fx.scheduled
            .iter()
            .find(|t| t.kind == TaskKind::FinalizeRound)
            .cloned()
            .expect("finalize scheduled")
    }

    fn round_end(fx: &Effects, conn: ConnectionId) -> (Team, u32, bool) {
        fx.messages_for(conn)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::TeamRoundEnd {
                    team,
                    built,
                    is_correct,
                    ..
                } => Some((*team, *built, *is_correct)),
                _ => None,
            })
            .expect("teamRoundEnd")
    }

    /// Plays one round for `team` answering with `tens`/`ones`, firing the
    /// finalize task. Returns the finalize effects.
    fn play_round(
        c: &mut Coordinator,
        code: &str,
        team: Team,
        answer: u32,
        tens: u8,
        ones: u8,
        now: u64,
    ) -> Effects {
        force_answer(c, code, team, answer, Difficulty::Easy);
        let (p0, p1) = match team {
            Team::A => (A0, A1),
            Team::B => (B0, B1),
        };
        digit(c, p0, code, Place::Tens, tens, now);
        let fx = digit(c, p1, code, Place::Ones, ones, now);
        let task = finalize_task(&fx);
        c.fire(&task, now + 150)
    }

    #[test]
    fn test_create_room_acknowledges_and_broadcasts() {
        let mut c = coordinator();
        let code = create(&mut c, HOST);
        assert_eq!(c.registry().len(), 1);
        assert_eq!(room(&c, &code).host, HOST);
        assert_eq!(room(&c, &code).players()[0].name, "p1");
    }

    #[test]
    fn test_join_unknown_room_reports_error() {
        let mut c = coordinator();
        let fx = join(&mut c, B0, "ZZZZZ");
        assert_eq!(
            fx.messages_for(B0),
            vec![&ServerMessage::Error {
                message: "Room not found.".into()
            }]
        );
        assert_eq!(fx.outbound[0].recipients, vec![B0]);
    }

    #[test]
    fn test_join_broadcasts_to_all_members() {
        let mut c = coordinator();
        let code = create(&mut c, HOST);
        let fx = join(&mut c, B0, &code);
        assert!(matches!(
            fx.messages_for(B0)[0],
            ServerMessage::Joined { self_id, .. } if *self_id == B0
        ));
        let update = fx.outbound.last().unwrap();
        assert!(matches!(update.message, ServerMessage::RoomUpdate(_)));
        assert_eq!(update.recipients, vec![HOST, B0]);
    }

    #[test]
    fn test_join_random_fills_then_creates() {
        let mut c = coordinator();
        let random = |c: &mut Coordinator, id: u32| {
            let fx = c.handle(
                ConnectionId(id),
                Command::JoinRandom {
                    name: "Guest".into(),
                    avatar: None,
                },
                0,
            );
            match fx.messages_for(ConnectionId(id))[0] {
                ServerMessage::Joined { room_code, .. } => room_code.clone(),
                other => panic!("unexpected {:?}", other),
            }
        };

        let first = random(&mut c, 1);
        assert_eq!(room(&c, &first).name, "Random Match");
        assert_eq!(room(&c, &first).host, ConnectionId(1));
        for id in 2..=4 {
            assert_eq!(random(&mut c, id), first);
        }
        let second = random(&mut c, 5);
        assert_ne!(second, first);
        assert_eq!(c.registry().len(), 2);
    }

    #[test]
    fn test_sit_taken_slot_reports_error() {
        let mut c = coordinator();
        let code = create(&mut c, A0);
        join(&mut c, B0, &code);
        sit(&mut c, A0, &code, Team::A, Slot::Zero);

        let fx = sit(&mut c, B0, &code, Team::A, Slot::Zero);
        assert_eq!(
            fx.messages_for(B0),
            vec![&ServerMessage::Error {
                message: "That slot is taken.".into()
            }]
        );
        assert_eq!(room(&c, &code).player(B0).unwrap().seat(), None);

        // Re-sitting in your own seat is fine and clears readiness.
        ready(&mut c, A0, &code);
        let fx = sit(&mut c, A0, &code, Team::A, Slot::Zero);
        assert!(matches!(fx.outbound[0].message, ServerMessage::RoomUpdate(_)));
        assert!(!room(&c, &code).player(A0).unwrap().ready);
    }

    #[test]
    fn test_sit_by_non_member_is_dropped() {
        let mut c = coordinator();
        let code = create(&mut c, A0);
        assert!(sit(&mut c, B0, &code, Team::B, Slot::Zero).is_empty());
        assert!(sit(&mut c, B0, "NOPE1", Team::B, Slot::Zero).is_empty());
    }

    #[test]
    fn test_start_requires_host() {
        let mut c = coordinator();
        let code = ready_room(&mut c);
        let fx = start(&mut c, B0, &code, 0);
        assert_eq!(
            fx.messages_for(B0),
            vec![&ServerMessage::Error {
                message: "Only the host can do that.".into()
            }]
        );
        assert_eq!(room(&c, &code).state.phase, Phase::Lobby);
    }

    #[test]
    fn test_start_requires_ready_table() {
        let mut c = coordinator();
        let code = ready_room(&mut c);
        c.handle(
            A1,
            Command::Ready {
                code: code.clone(),
                ready: false,
            },
            0,
        );
        let fx = start(&mut c, HOST, &code, 0);
        assert_eq!(
            fx.messages_for(HOST),
            vec![&ServerMessage::Error {
                message: "Need 4 seated players and everyone ready.".into()
            }]
        );
        assert_eq!(room(&c, &code).state.phase, Phase::Lobby);
    }

    #[test]
    fn test_start_begins_both_teams() {
        let mut c = coordinator();
        let code = ready_room(&mut c);
        let fx = start(&mut c, HOST, &code, 1_000);

        let r = room(&c, &code);
        assert_eq!(r.state.phase, Phase::Playing);
        assert_eq!(r.state.match_no, 1);
        assert_eq!(r.state.match_start_at, Some(1_000));
        assert_eq!(r.state.rounds, PerTeam::new(1, 1));
        assert!(r.question(Team::A).is_some() && r.question(Team::B).is_some());
        assert!(r.players().iter().all(|p| !p.ready && p.score == 0));

        // Every player sees the update, then only their own team's round start.
        for conn in [A0, B0, A1, B1] {
            let messages = fx.messages_for(conn);
            assert!(matches!(messages[0], ServerMessage::RoomUpdate(_)));
            let starts: Vec<_> = messages
                .iter()
                .filter(|m| matches!(m, ServerMessage::RoundStart { .. }))
                .collect();
            assert_eq!(starts.len(), 1);
        }
        let a_start = fx
            .outbound
            .iter()
            .find(|o| matches!(o.message, ServerMessage::RoundStart { .. }))
            .unwrap();
        assert_eq!(a_start.recipients, vec![A0, A1]);

        // A second start while playing is ignored.
        assert!(start(&mut c, HOST, &code, 2_000).is_empty());
    }

    #[test]
    fn test_round_start_never_leaks_answer() {
        let mut c = coordinator();
        let code = ready_room(&mut c);
        let fx = start(&mut c, HOST, &code, 0);
        for out in &fx.outbound {
            let json = serde_json::to_value(&out.message).unwrap();
            assert!(json.to_string().find("answer\"").is_none(), "{}", json);
        }
    }

    #[test]
    fn test_slot_zero_cannot_write_ones() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        force_answer(&mut c, &code, Team::A, 42, Difficulty::Easy);

        assert!(digit(&mut c, A0, &code, Place::Ones, 2, 10).is_empty());
        assert!(digit(&mut c, A1, &code, Place::Tens, 4, 10).is_empty());
        let board = room(&c, &code).board(Team::A).unwrap();
        assert_eq!(board.value(Place::Ones), None);
        assert_eq!(board.value(Place::Tens), None);
    }

    #[test]
    fn test_locked_place_keeps_value() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        force_answer(&mut c, &code, Team::A, 42, Difficulty::Easy);

        assert!(!digit(&mut c, A0, &code, Place::Tens, 4, 10).is_empty());
        assert!(digit(&mut c, A0, &code, Place::Tens, 7, 11).is_empty());
        assert_eq!(room(&c, &code).board(Team::A).unwrap().value(Place::Tens), Some(4));
    }

    #[test]
    fn test_unseated_player_cannot_write() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        join(&mut c, ConnectionId(9), &code);
        assert!(digit(&mut c, ConnectionId(9), &code, Place::Tens, 1, 0).is_empty());
    }

    #[test]
    fn test_digits_in_lobby_are_dropped() {
        let mut c = coordinator();
        let code = ready_room(&mut c);
        assert!(digit(&mut c, A0, &code, Place::Tens, 1, 0).is_empty());
    }

    #[test]
    fn test_team_round_completes_independently() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        force_answer(&mut c, &code, Team::A, 42, Difficulty::Easy);

        let fx = digit(&mut c, A0, &code, Place::Tens, 4, 100);
        assert!(fx.scheduled.is_empty());
        let fx = digit(&mut c, A1, &code, Place::Ones, 2, 120);
        let board = room(&c, &code).board(Team::A).unwrap();
        assert!(board.overall_locked);
        assert!(board.is_locked(Place::Tens) && board.is_locked(Place::Ones));

        // Broadcast first, finalize later.
        assert!(matches!(fx.outbound[0].message, ServerMessage::RoomUpdate(_)));
        let task = finalize_task(&fx);
        assert_eq!(task.team, Team::A);
        assert_eq!(task.delay, Duration::from_millis(150));

        let fx = c.fire(&task, 270);
        assert_eq!(round_end(&fx, A0), (Team::A, 42, true));
        assert_eq!(round_end(&fx, A1), (Team::A, 42, true));
        assert!(fx.messages_for(B0).iter().all(|m| !matches!(m, ServerMessage::TeamRoundEnd { .. })));
        assert_eq!(room(&c, &code).state.stats[Team::A].correct_count, 1);
        assert_eq!(room(&c, &code).state.scores[Team::A], 1);

        let next = fx.scheduled[0].clone();
        assert_eq!(next.kind, TaskKind::NextRound);
        assert_eq!(next.delay, Duration::from_millis(800));

        let fx = c.fire(&next, 1_070);
        let r = room(&c, &code);
        assert_eq!(r.state.rounds, PerTeam::new(2, 1));
        let start = fx
            .outbound
            .iter()
            .find(|o| matches!(o.message, ServerMessage::RoundStart { .. }))
            .unwrap();
        assert_eq!(start.recipients, vec![A0, A1]);

        // Re-firing the same finalize is a no-op.
        assert!(c.fire(&task, 2_000).is_empty());
    }

    #[test]
    fn test_wrong_answer_ends_round_without_credit() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        let fx = play_round(&mut c, &code, Team::B, 42, 4, 1, 10);
        assert_eq!(round_end(&fx, B0), (Team::B, 41, false));
        assert_eq!(room(&c, &code).state.stats[Team::B].correct_count, 0);
        assert_eq!(fx.scheduled[0].kind, TaskKind::NextRound);
    }

    #[test]
    fn test_finalize_widths() {
        let cases = [
            (7, Difficulty::Easy, 0, 7, 7, true),
            (42, Difficulty::Easy, 4, 2, 42, true),
            (123, Difficulty::Medium, 2, 3, 123, true),
            (5872, Difficulty::Hard, 7, 1, 5871, false),
        ];
        for (answer, difficulty, tens, ones, built, correct) in cases {
            let mut c = coordinator();
            let code = started_room(&mut c, 0);
            force_answer(&mut c, &code, Team::A, answer, difficulty);
            digit(&mut c, A0, &code, Place::Tens, tens, 1);
            let fx = digit(&mut c, A1, &code, Place::Ones, ones, 2);
            let fx = c.fire(&finalize_task(&fx), 200);
            assert_eq!(round_end(&fx, A0), (Team::A, built, correct), "answer {}", answer);
        }
    }

    #[test]
    fn test_submit_locks_and_records_full_value() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        force_answer(&mut c, &code, Team::A, 5872, Difficulty::Hard);

        let fx = c.handle(
            A1,
            Command::Submit {
                code: code.clone(),
                tens: 7,
                ones: 1,
            },
            500,
        );
        let board = room(&c, &code).board(Team::A).unwrap();
        assert!(board.overall_locked);
        assert_eq!(board.submitted_value, Some(5871));
        assert_eq!(board.submitted_by, Some(A1));
        assert_eq!(board.submitted_at, Some(500));

        let fx = c.fire(&finalize_task(&fx), 650);
        assert_eq!(round_end(&fx, A0), (Team::A, 5871, false));

        // The board is closed for the rest of the round.
        let again = c.handle(
            A0,
            Command::Submit {
                code: code.clone(),
                tens: 7,
                ones: 2,
            },
            700,
        );
        assert!(again.is_empty());
    }

    #[test]
    fn test_reaching_target_wins_outright() {
        let mut c = coordinator();
        let code = started_room(&mut c, 1_000);
        c.registry_mut().get_mut(&code).unwrap().state.stats[Team::A].correct_count = 9;
        c.registry_mut().get_mut(&code).unwrap().state.stats[Team::B].correct_count = 7;

        let fx = play_round(&mut c, &code, Team::A, 42, 4, 2, 5_000);
        let r = room(&c, &code);
        assert_eq!(r.state.phase, Phase::Ended);
        assert_eq!(r.state.winner, Some(Winner::A));
        assert_eq!(r.state.stats[Team::A].time_to_target, Some(4_000));
        assert_eq!(r.state.stats[Team::B].time_to_target, None);
        assert!(fx.scheduled.is_empty());

        for conn in [A0, B0, A1, B1] {
            let ended = fx
                .messages_for(conn)
                .into_iter()
                .find_map(|m| match m {
                    ServerMessage::Ended { winner, results, .. } => Some((*winner, results.len())),
                    _ => None,
                })
                .expect("game:ended");
            assert_eq!(ended, (Winner::A, 4));
        }

        // No more writes once ended.
        assert!(digit(&mut c, B0, &code, Place::Tens, 1, 6_000).is_empty());
    }

    #[test]
    fn test_pending_rival_round_settled_before_winner() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        for team in Team::ALL {
            c.registry_mut().get_mut(&code).unwrap().state.stats[team].correct_count = 9;
        }

        // B locks first, A a little later; A's finalize happens to run first.
        force_answer(&mut c, &code, Team::B, 42, Difficulty::Easy);
        force_answer(&mut c, &code, Team::A, 42, Difficulty::Easy);
        digit(&mut c, B0, &code, Place::Tens, 4, 900);
        let fx_b = digit(&mut c, B1, &code, Place::Ones, 2, 1_000);
        digit(&mut c, A0, &code, Place::Tens, 4, 1_050);
        let fx_a = digit(&mut c, A1, &code, Place::Ones, 2, 1_100);

        let fx = c.fire(&finalize_task(&fx_a), 1_250);
        let r = room(&c, &code);
        assert_eq!(r.state.stats[Team::A].time_to_target, Some(1_100));
        assert_eq!(r.state.stats[Team::B].time_to_target, Some(1_000));
        assert_eq!(r.state.winner, Some(Winner::B));
        assert_eq!(round_end(&fx, B0), (Team::B, 42, true));

        // B's own finalize arrives afterwards and finds the match over.
        assert!(c.fire(&finalize_task(&fx_b), 1_150).is_empty());
    }

    #[test]
    fn test_simultaneous_lock_is_a_tie() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        for team in Team::ALL {
            c.registry_mut().get_mut(&code).unwrap().state.stats[team].correct_count = 9;
            force_answer(&mut c, &code, team, 42, Difficulty::Easy);
        }
        digit(&mut c, A0, &code, Place::Tens, 4, 10);
        digit(&mut c, B0, &code, Place::Tens, 4, 10);
        let fx_a = digit(&mut c, A1, &code, Place::Ones, 2, 2_000);
        digit(&mut c, B1, &code, Place::Ones, 2, 2_000);

        c.fire(&finalize_task(&fx_a), 2_150);
        assert_eq!(room(&c, &code).state.winner, Some(Winner::Tie));
    }

    #[test]
    fn test_decide_winner() {
        let stats = |a: (u32, Option<u64>), b: (u32, Option<u64>)| {
            PerTeam::new(
                TeamStats {
                    correct_count: a.0,
                    time_to_target: a.1,
                },
                TeamStats {
                    correct_count: b.0,
                    time_to_target: b.1,
                },
            )
        };
        assert_eq!(decide_winner(&stats((10, Some(4_000)), (10, Some(5_000))), 10), Some(Winner::A));
        assert_eq!(decide_winner(&stats((10, Some(6_000)), (10, Some(5_000))), 10), Some(Winner::B));
        assert_eq!(decide_winner(&stats((10, Some(5_000)), (10, Some(5_000))), 10), Some(Winner::Tie));
        assert_eq!(decide_winner(&stats((10, Some(4_000)), (7, None)), 10), Some(Winner::A));
        assert_eq!(decide_winner(&stats((3, None), (7, None)), 10), None);
    }

    #[test]
    fn test_stale_tasks_are_ignored() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        force_answer(&mut c, &code, Team::A, 42, Difficulty::Easy);
        digit(&mut c, A0, &code, Place::Tens, 4, 1);
        let fx = digit(&mut c, A1, &code, Place::Ones, 2, 2);
        let task = finalize_task(&fx);

        // Everyone leaves before the timer fires.
        for conn in [A0, B0, A1, B1] {
            c.handle(conn, Command::Disconnect, 3);
        }
        assert!(c.registry().is_empty());
        assert!(c.fire(&task, 200).is_empty());
    }

    #[test]
    fn test_rematch_invalidates_old_tasks() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        c.registry_mut().get_mut(&code).unwrap().state.stats[Team::A].correct_count = 9;
        force_answer(&mut c, &code, Team::B, 42, Difficulty::Easy);
        digit(&mut c, B0, &code, Place::Tens, 4, 1);
        let fx_b = digit(&mut c, B1, &code, Place::Ones, 1, 2);

        play_round(&mut c, &code, Team::A, 42, 4, 2, 10);
        assert_eq!(room(&c, &code).state.phase, Phase::Ended);

        for conn in [A0, B0, A1, B1] {
            ready(&mut c, conn, &code);
        }
        let fx = start(&mut c, HOST, &code, 500);
        assert_eq!(room(&c, &code).state.match_no, 2);
        assert!(!fx.outbound.is_empty());
        assert_eq!(room(&c, &code).state.stats, PerTeam::default());

        // B's wrong-answer finalize from match 1 must not touch match 2.
        assert!(c.fire(&finalize_task(&fx_b), 600).is_empty());
        assert_eq!(room(&c, &code).state.rounds, PerTeam::new(1, 1));
    }

    #[test]
    fn test_settings_host_only_and_not_while_playing() {
        let mut c = coordinator();
        let code = ready_room(&mut c);
        let settings = |difficulty| Command::Settings {
            code: code.clone(),
            difficulty: Some(difficulty),
            round_ms: Some(20_000),
            total_rounds: None,
        };

        let fx = c.handle(B0, settings(Difficulty::Hard), 0);
        assert!(matches!(fx.messages_for(B0)[0], ServerMessage::Error { .. }));
        assert_eq!(room(&c, &code).config.difficulty, Difficulty::Easy);

        c.handle(HOST, settings(Difficulty::Medium), 0);
        assert_eq!(room(&c, &code).config.difficulty, Difficulty::Medium);
        assert_eq!(room(&c, &code).config.round_ms, 20_000);
        assert_eq!(room(&c, &code).config.total_rounds, 10);

        start(&mut c, HOST, &code, 0);
        assert!(c.handle(HOST, settings(Difficulty::Hard), 0).is_empty());
        assert_eq!(room(&c, &code).config.difficulty, Difficulty::Medium);
    }

    #[test]
    fn test_chat_relayed_to_room() {
        let mut c = coordinator();
        let code = create(&mut c, HOST);
        join(&mut c, B0, &code);
        let fx = c.handle(
            B0,
            Command::Chat {
                code: code.clone(),
                text: "gl hf".into(),
            },
            77,
        );
        assert_eq!(fx.outbound[0].recipients, vec![HOST, B0]);
        assert_eq!(
            fx.outbound[0].message,
            ServerMessage::Chat {
                from: "p2".into(),
                text: "gl hf".into(),
                at: 77,
            }
        );

        let stranger = c.handle(
            ConnectionId(9),
            Command::Chat {
                code,
                text: "hi".into(),
            },
            0,
        );
        assert!(stranger.is_empty());
    }

    #[test]
    fn test_host_leaving_passes_host() {
        let mut c = coordinator();
        let code = create(&mut c, HOST);
        join(&mut c, B0, &code);
        join(&mut c, A1, &code);

        let fx = c.handle(HOST, Command::Leave { code: code.clone() }, 0);
        assert_eq!(room(&c, &code).host, B0);
        assert_eq!(fx.outbound[0].recipients, vec![B0, A1]);
    }

    #[test]
    fn test_last_member_leaving_removes_room() {
        let mut c = coordinator();
        let code = create(&mut c, HOST);
        join(&mut c, B0, &code);

        c.handle(B0, Command::Leave { code: code.clone() }, 0);
        assert_eq!(room(&c, &code).host, HOST);

        let fx = c.handle(HOST, Command::Leave { code: code.clone() }, 0);
        assert!(c.registry().get(&code).is_none());
        assert_eq!(fx.closed_rooms, vec![code]);
        assert!(fx.outbound.is_empty());
    }

    #[test]
    fn test_disconnect_leaves_every_room() {
        let mut c = coordinator();
        let first = create(&mut c, HOST);
        let second = create(&mut c, B0);
        join(&mut c, HOST, &second);

        let fx = c.handle(HOST, Command::Disconnect, 0);
        assert!(c.registry().get(&first).is_none());
        assert_eq!(fx.closed_rooms, vec![first]);
        assert!(!room(&c, &second).contains(HOST));
        assert_eq!(c.handle(HOST, Command::Disconnect, 0).closed_rooms.len(), 0);
    }

    #[test]
    fn test_match_survives_player_disconnect() {
        let mut c = coordinator();
        let code = started_room(&mut c, 0);
        c.handle(B1, Command::Disconnect, 10);

        let fx = play_round(&mut c, &code, Team::A, 42, 4, 2, 20);
        assert_eq!(round_end(&fx, A0), (Team::A, 42, true));
        assert_eq!(room(&c, &code).state.phase, Phase::Playing);
    }
}
