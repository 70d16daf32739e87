//! # Dual Math Server Library
//!
//! Authoritative server for a real-time 2v2 arithmetic game. Players gather in
//! rooms identified by a short code, sit in one of four seats, and race the
//! other team to a target number of correct answers. Each player owns one
//! digit of their team's answer: slot 0 writes the tens, slot 1 the ones.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! All room state lives on one task. Socket readers, socket writers and match
//! timers are separate tasks that communicate with it over channels, so no
//! room is ever mutated concurrently and every broadcast reflects the state
//! right after the mutation that caused it.
//!
//! ### Pure Coordinator
//! The coordinator takes a command and a timestamp and returns effects:
//! messages to deliver, tasks to schedule, rooms that were destroyed. The
//! network layer carries those effects out. Tests drive the coordinator
//! directly and fire timers by hand.
//!
//! ### WebSocket JSON Protocol
//! One JSON text frame per message, shaped `{"event": .., "data": ..}`. The
//! wire types live in the `shared` crate. The same port answers
//! `GET /health` with a small JSON status document.
//!
//! ## Module Organization
//!
//! - `question`: arithmetic problem generation per difficulty
//! - `board`: per-team digit board, locking and finalization
//! - `room`: room aggregate, seating and the public projection
//! - `registry`: room codes and random matchmaking
//! - `command`: validation of raw client messages
//! - `coordinator`: match lifecycle and per-team round race
//! - `gateway`: outbound addressing and connection bookkeeping
//! - `network`: HTTP routes, sockets, timers and the main loop
//! - `origin`: allowlist for browser origins on WebSocket upgrades
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:5050".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let server = Server::bind(config).await?;
//!     server
//!         .run()
//!         .await
//!         .map_err(|e| -> Box<dyn std::error::Error> { e })?;
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod command;
pub mod coordinator;
pub mod gateway;
pub mod network;
pub mod origin;
pub mod question;
pub mod registry;
pub mod room;
pub mod utils;
