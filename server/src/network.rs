//! Server network layer: HTTP routes, WebSocket transport and the single
//! event loop that owns all room state.
//!
//! The listener serves two routes: `GET /health` for deployment probes and
//! `GET /` which upgrades to a WebSocket once the `Origin` header passes the
//! allowlist. Every socket gets a reader task and a writer task. Readers decode JSON
//! frames and forward them to the main loop over one unbounded channel;
//! writers drain a per-connection queue filled by the `ConnectionManager`.
//! Deferred match tasks are plain `tokio::time::sleep` tasks that post back
//! into the same channel, so every mutation happens on the main loop in
//! arrival order.

use crate::command::Command;
use crate::coordinator::{Coordinator, Effects, MatchTiming, ScheduledTask};
use crate::gateway::ConnectionManager;
use crate::origin::OriginPolicy;
use crate::utils::get_timestamp;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use shared::{ClientMessage, ConnectionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Events delivered to the main loop.
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    MessageReceived {
        id: ConnectionId,
        msg: ClientMessage,
    },
    Disconnected {
        id: ConnectionId,
    },
    TimerFired(ScheduledTask),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_connections: usize,
    pub timing: MatchTiming,
    pub allowed_origins: OriginPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5050".to_string(),
            max_connections: 1024,
            timing: MatchTiming::default(),
            allowed_origins: OriginPolicy::default(),
        }
    }
}

/// Shared with HTTP handlers; everything else stays on the main loop.
#[derive(Clone)]
struct AppState {
    events: mpsc::UnboundedSender<ServerEvent>,
    origins: Arc<OriginPolicy>,
    started: Instant,
}

/// Room state, live connections and pending timers. Only the main loop
/// touches it.
struct Hub {
    coordinator: Coordinator,
    connections: ConnectionManager,
    timers: HashMap<String, Vec<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    last_counts: (usize, usize),
}

pub struct Server {
    listener: TcpListener,
    hub: Hub,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    origins: Arc<OriginPolicy>,
    started: Instant,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        info!("Allowed WebSocket origins: {}", config.allowed_origins.describe());

        let (events, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            hub: Hub {
                coordinator: Coordinator::new(config.timing),
                connections: ConnectionManager::new(config.max_connections),
                timers: HashMap::new(),
                events,
                last_counts: (0, 0),
            },
            event_rx,
            origins: Arc::new(config.allowed_origins),
            started: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for injecting events, e.g. `ServerEvent::Shutdown`.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.hub.events.clone()
    }

    /// Runs until a `Shutdown` event arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Server {
            listener,
            mut hub,
            mut event_rx,
            origins,
            started,
        } = self;

        let app = router(AppState {
            events: hub.events.clone(),
            origins,
            started,
        });
        let http = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                error!("HTTP listener stopped: {}", e);
            }
        });
        let mut stats_interval = interval(Duration::from_secs(30));

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(ServerEvent::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(event) => hub.handle_event(event),
                    }
                },

                _ = stats_interval.tick() => {
                    if !hub.connections.is_empty() {
                        debug!(
                            "{} connections, {} rooms, {} rooms with pending timers",
                            hub.connections.len(),
                            hub.coordinator.registry().len(),
                            hub.timers.len()
                        );
                    }
                },
            }
        }

        http.abort();
        for handle in hub.timers.into_values().flatten() {
            handle.abort();
        }
        Ok(())
    }
}

impl Hub {
    fn handle_event(&mut self, event: ServerEvent) {
        let now = get_timestamp();

        let effects = match event {
            ServerEvent::Connected {
                addr,
                sender,
                reply,
            } => {
                let id = self.connections.add_connection(addr, sender);
                if reply.send(id).is_err() {
                    // The socket task gave up before we answered.
                    if let Some(id) = id {
                        self.connections.remove_connection(id);
                    }
                }
                self.log_counts();
                return;
            }
            ServerEvent::MessageReceived { id, msg } => match Command::from_message(msg) {
                Some(command) => {
                    debug!("{} from {}", command.name(), id);
                    self.coordinator.handle(id, command, now)
                }
                None => {
                    debug!("Dropping invalid message from {}", id);
                    return;
                }
            },
            ServerEvent::Disconnected { id } => {
                self.connections.remove_connection(id);
                self.coordinator.handle(id, Command::Disconnect, now)
            }
            ServerEvent::TimerFired(task) => self.coordinator.fire(&task, now),
            ServerEvent::Shutdown => return,
        };

        self.apply(effects);
        self.log_counts();
    }

    fn apply(&mut self, effects: Effects) {
        for outbound in &effects.outbound {
            self.connections.deliver(outbound);
        }

        for task in effects.scheduled {
            self.schedule(task);
        }

        for code in effects.closed_rooms {
            if let Some(handles) = self.timers.remove(&code) {
                debug!("Cancelling {} timers for closed room {}", handles.len(), code);
                for handle in handles {
                    handle.abort();
                }
            }
        }
    }

    /// Logs connection and room counts whenever either changes.
    fn log_counts(&mut self) {
        let counts = (self.connections.len(), self.coordinator.registry().len());
        if counts != self.last_counts {
            info!("{} connections, {} rooms", counts.0, counts.1);
            self.last_counts = counts;
        }
    }

    fn schedule(&mut self, task: ScheduledTask) {
        let events = self.events.clone();
        let room = task.room.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(task.delay).await;
            if let Err(e) = events.send(ServerEvent::TimerFired(task)) {
                error!("Failed to deliver timer to main loop: {}", e);
            }
        });

        let handles = self.timers.entry(room).or_default();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime": state.started.elapsed().as_secs_f64(),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    // A header that is not valid text can never match an allowed origin.
    let origin = headers
        .get(header::ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if !state.origins.allows(origin) {
        warn!("Rejected WebSocket from {} with origin {:?}", addr, origin);
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| serve_connection(socket, addr, state.events))
}

/// Drives one WebSocket from upgrade to close.
async fn serve_connection(
    socket: WebSocket,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let (mut sink, mut source) = socket.split();

    let (sender, mut outbox) = mpsc::unbounded_channel::<String>();
    let (reply, registered) = oneshot::channel();
    if events
        .send(ServerEvent::Connected {
            addr,
            sender,
            reply,
        })
        .is_err()
    {
        return;
    }
    let id = match registered.await {
        Ok(Some(id)) => id,
        _ => {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("Write to {} failed: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => {
                    if events.send(ServerEvent::MessageReceived { id, msg }).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to decode frame from {}: {}", id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read from {} failed: {}", id, e);
                break;
            }
        }
    }

    let _ = events.send(ServerEvent::Disconnected { id });
    writer.abort();
}
