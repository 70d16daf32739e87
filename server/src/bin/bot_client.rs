//! Load and smoke-test client. Spawns bots that join random rooms, take a free
//! seat, ready up and play: each bot computes the answer and writes its own
//! digit after a random think time.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::{
    ClientMessage, ConnectionId, DigitPayload, JoinRandomPayload, Phase, Place, PublicRoom,
    ReadyPayload, RoomCodePayload, ServerMessage, SitPayload, Slot, Team,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type BotResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bot players for the 2v2 arithmetic server")]
struct Args {
    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:5050")]
    server: String,

    /// Number of bots; every four fill one room
    #[arg(short, long, default_value = "4")]
    bots: usize,

    /// Shortest think time before writing a digit (ms)
    #[arg(long, default_value = "200")]
    min_delay_ms: u64,

    /// Longest think time before writing a digit (ms)
    #[arg(long, default_value = "1500")]
    max_delay_ms: u64,

    /// Probability of writing a wrong digit
    #[arg(long, default_value = "0.1")]
    mistake_rate: f64,
}

struct Bot {
    name: String,
    preferred_seat: usize,
    self_id: Option<ConnectionId>,
    room_code: Option<String>,
    slot: Option<Slot>,
}

impl Bot {
    fn code(&self) -> Option<String> {
        self.room_code.clone()
    }

    /// Sits, readies and (as host) starts, depending on what the room shows.
    fn on_room_update(&mut self, room: &PublicRoom, out: &mpsc::UnboundedSender<ClientMessage>) {
        let Some(self_id) = self.self_id else {
            return;
        };
        let Some(me) = room.players.iter().find(|p| p.id == self_id) else {
            return;
        };
        self.slot = me.slot;
        if room.state.phase == Phase::Playing {
            return;
        }

        let room_code = Some(room.room_code.clone());
        if me.team.is_none() || me.slot.is_none() {
            if let Some((team, slot)) = free_seat(room, self.preferred_seat) {
                let _ = out.send(ClientMessage::Sit(SitPayload {
                    room_code,
                    team: Some(team),
                    slot: Some(slot),
                }));
            }
            return;
        }

        if !me.ready {
            let _ = out.send(ClientMessage::Ready(ReadyPayload {
                room_code,
                ready: Some(true),
            }));
            return;
        }

        let table_ready = room.players.iter().filter(|p| p.slot.is_some() && p.ready).count() == 4;
        if room.host_id == self_id && table_ready {
            info!("{} starting match in {}", self.name, room.room_code);
            let _ = out.send(ClientMessage::Start(RoomCodePayload { room_code }));
        }
    }
}

fn free_seat(room: &PublicRoom, preferred: usize) -> Option<(Team, Slot)> {
    let seats: Vec<(Team, Slot)> = Team::ALL
        .iter()
        .flat_map(|team| Slot::ALL.iter().map(move |slot| (*team, *slot)))
        .collect();
    let taken = |team: Team, slot: Slot| {
        room.players
            .iter()
            .any(|p| p.team == Some(team) && p.slot == Some(slot))
    };
    (0..seats.len())
        .map(|i| seats[(preferred + i) % seats.len()])
        .find(|(team, slot)| !taken(*team, *slot))
}

async fn run_bot(index: usize, args: Arc<Args>) -> BotResult<()> {
    let (ws, _response) = connect_async(args.server.as_str()).await?;
    let (mut write, mut read) = ws.split();

    let (out, mut outbox) = mpsc::unbounded_channel::<ClientMessage>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode message: {}", e);
                    continue;
                }
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut bot = Bot {
        name: format!("bot-{}", index),
        preferred_seat: index,
        self_id: None,
        room_code: None,
        slot: None,
    };
    out.send(ClientMessage::JoinRandom(JoinRandomPayload {
        name: Some(bot.name.clone()),
        avatar_data: None,
    }))?;

    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let msg: ServerMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{} got undecodable frame: {}", bot.name, e);
                continue;
            }
        };

        match msg {
            ServerMessage::Joined { room_code, self_id } => {
                info!("{} joined {} as {}", bot.name, room_code, self_id);
                bot.room_code = Some(room_code);
                bot.self_id = Some(self_id);
            }
            ServerMessage::RoomUpdate(room) => bot.on_room_update(&room, &out),
            ServerMessage::RoundStart {
                round, question, ..
            } => {
                let Some(slot) = bot.slot else {
                    continue;
                };
                let Some(answer) = question.op.apply(question.a, question.b) else {
                    warn!("{} cannot solve {:?}", bot.name, question);
                    continue;
                };

                let (place, mut digit) = match slot {
                    Slot::Zero => (Place::Tens, (answer / 10 % 10) as u8),
                    Slot::One => (Place::Ones, (answer % 10) as u8),
                };
                let (delay, mistake) = {
                    let mut rng = rand::thread_rng();
                    let delay = rng.gen_range(args.min_delay_ms..=args.max_delay_ms.max(args.min_delay_ms));
                    (delay, rng.gen_bool(args.mistake_rate.clamp(0.0, 1.0)))
                };
                if mistake {
                    digit = (digit + 1) % 10;
                }
                debug!(
                    "{} round {}: {} {} {} -> writing {} to {:?} in {}ms",
                    bot.name, round, question.a, question.op, question.b, digit, place, delay
                );

                let out = out.clone();
                let room_code = bot.code();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let _ = out.send(ClientMessage::Digit(DigitPayload {
                        room_code,
                        place: Some(place),
                        digit: Some(digit),
                    }));
                });
            }
            ServerMessage::TeamRoundEnd {
                team,
                built,
                correct,
                is_correct,
                team_stats,
                ..
            } => {
                debug!(
                    "{} saw team {} build {} (answer {}, {}), {} correct",
                    bot.name,
                    team,
                    built,
                    correct,
                    if is_correct { "correct" } else { "wrong" },
                    team_stats[team].correct_count
                );
            }
            ServerMessage::Ended {
                winner, team_stats, ..
            } => {
                info!(
                    "{} match over: winner {:?}, A {} / B {}",
                    bot.name, winner, team_stats.a.correct_count, team_stats.b.correct_count
                );
                break;
            }
            ServerMessage::Error { message } => debug!("{} error: {}", bot.name, message),
            ServerMessage::Chat { .. } => {}
        }
    }

    writer.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Arc::new(Args::parse());
    info!("Starting {} bots against {}", args.bots, args.server);

    let mut handles = Vec::with_capacity(args.bots);
    for index in 0..args.bots {
        let args = Arc::clone(&args);
        handles.push(tokio::spawn(run_bot(index, args)));
        // Stagger joins so each group of four lands in the same room.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("bot-{} failed: {}", index, e),
            Err(e) => error!("bot-{} panicked: {}", index, e),
        }
    }

    Ok(())
}
