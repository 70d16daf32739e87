//! Process-wide room registry.
//!
//! Owns the code -> room map. Constructed once by the server and handed to the
//! coordinator; tests build their own isolated instances.

use crate::room::{Player, Room};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ConnectionId, ROOM_CODE_ALPHABET, ROOM_CODE_LEN};
use std::collections::HashMap;

pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    next_seq: u64,
    rng: StdRng,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rooms: HashMap::new(),
            next_seq: 0,
            rng,
        }
    }

    /// Creates a room seated with `host` and returns its fresh code.
    pub fn create(&mut self, name: String, host: Player) -> String {
        let code = self.unused_code();
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut room = Room::new(code.clone(), name, host.id, seq);
        room.add_player(host);
        info!("Room {} created ({:?})", code, room.name);
        self.rooms.insert(code.clone(), room);
        code
    }

    /// Oldest lobby room with fewer than four members.
    pub fn find_joinable(&self) -> Option<&str> {
        self.rooms
            .values()
            .filter(|room| room.is_joinable())
            .min_by_key(|room| room.created_seq)
            .map(|room| room.code.as_str())
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn remove(&mut self, code: &str) -> Option<Room> {
        let room = self.rooms.remove(code)?;
        info!("Room {} removed", code);
        Some(room)
    }

    /// Codes of every room `id` belongs to, oldest first.
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<&Room> = self.rooms.values().filter(|r| r.contains(id)).collect();
        rooms.sort_by_key(|r| r.created_seq);
        rooms.into_iter().map(|r| r.code.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn unused_code(&mut self) -> String {
        loop {
            let code = random_code(&mut self.rng);
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a client-supplied room code.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Phase;

    fn registry() -> RoomRegistry {
        RoomRegistry::with_rng(StdRng::seed_from_u64(7))
    }

    fn host(id: u32) -> Player {
        Player::new(ConnectionId(id), "host".to_string(), None)
    }

    #[test]
    fn test_create_yields_code_from_alphabet() {
        let mut registry = registry();
        let code = registry.create("room".to_string(), host(1));

        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(code.bytes().all(|c| ROOM_CODE_ALPHABET.contains(&c)));

        let room = registry.get(&code).unwrap();
        assert_eq!(room.host, ConnectionId(1));
        assert!(room.contains(ConnectionId(1)));
        assert_eq!(room.state.phase, Phase::Lobby);
    }

    #[test]
    fn test_codes_are_unique() {
        let mut registry = registry();
        for i in 0..500 {
            registry.create(format!("room {}", i), host(i));
        }
        assert_eq!(registry.len(), 500);
    }

    #[test]
    fn test_find_joinable_prefers_oldest_open_lobby() {
        let mut registry = registry();
        assert!(registry.find_joinable().is_none());

        let first = registry.create("first".to_string(), host(1));
        let second = registry.create("second".to_string(), host(2));
        assert_eq!(registry.find_joinable(), Some(first.as_str()));

        registry.get_mut(&first).unwrap().state.phase = Phase::Playing;
        assert_eq!(registry.find_joinable(), Some(second.as_str()));

        let room = registry.get_mut(&second).unwrap();
        for id in 10..13 {
            room.add_player(host(id));
        }
        assert!(registry.find_joinable().is_none());
    }

    #[test]
    fn test_remove() {
        let mut registry = registry();
        let code = registry.create("room".to_string(), host(1));
        assert!(registry.remove(&code).is_some());
        assert!(registry.get(&code).is_none());
        assert!(registry.remove(&code).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rooms_of() {
        let mut registry = registry();
        let a = registry.create("a".to_string(), host(1));
        let b = registry.create("b".to_string(), host(2));
        registry.get_mut(&b).unwrap().add_player(host(1));

        assert_eq!(registry.rooms_of(ConnectionId(1)), vec![a, b.clone()]);
        assert_eq!(registry.rooms_of(ConnectionId(2)), vec![b]);
        assert!(registry.rooms_of(ConnectionId(3)).is_empty());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  abcde "), "ABCDE");
        assert_eq!(normalize_code(""), "");
    }
}
