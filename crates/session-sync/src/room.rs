//! Room keys and seat assignment.

use std::fmt;

use chess_core::Side;
use serde::{Deserialize, Serialize};

/// Player id reserved for the computer opponent's seat.
pub const ENGINE_PLAYER_ID: &str = "engine";

const KEY_SEPARATOR: char = ':';

/// Persistence key of one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey(String);

impl RoomKey {
    pub fn new(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("room key is empty".into());
        }
        if raw.chars().any(|c| c == '/' || c.is_whitespace()) {
            return Err(format!("room key '{raw}' contains '/' or whitespace"));
        }
        Ok(Self(raw.to_string()))
    }

    /// The key both players derive for their shared room: the sorted pair of
    /// ids, so either player opening the room lands on the same record.
    pub fn for_players(a: &str, b: &str) -> Result<Self, String> {
        for id in [a, b] {
            if id.trim().is_empty() || id.contains(KEY_SEPARATOR) {
                return Err(format!("invalid player id '{id}'"));
            }
        }
        let (first, second) = if a.trim() <= b.trim() { (a, b) } else { (b, a) };
        Self::new(&format!("{}{KEY_SEPARATOR}{}", first.trim(), second.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.0
    }
}

/// Who plays which colour. Fixed for the lifetime of a session once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAssignment {
    pub white_player_id: String,
    pub black_player_id: String,
}

impl PlayerAssignment {
    pub fn new(white: impl Into<String>, black: impl Into<String>) -> Self {
        Self {
            white_player_id: white.into(),
            black_player_id: black.into(),
        }
    }

    pub fn player(&self, side: Side) -> &str {
        match side {
            Side::White => &self.white_player_id,
            Side::Black => &self.black_player_id,
        }
    }

    /// Sides a player controls. Both sides when one player takes both seats.
    pub fn sides_of(&self, player_id: &str) -> Vec<Side> {
        [Side::White, Side::Black]
            .into_iter()
            .filter(|side| self.player(*side) == player_id)
            .collect()
    }

    pub fn engine_side(&self) -> Option<Side> {
        self.sides_of(ENGINE_PLAYER_ID).first().copied()
    }
}
