//! Immutable board positions in FEN.

use std::fmt;

use serde::{Deserialize, Serialize};
use shakmaty::{fen::Fen, CastlingMode, Chess, Color, EnPassantMode};

use crate::error::InvalidPosition;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => f.write_str("white"),
            Side::Black => f.write_str("black"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" | "w" => Ok(Side::White),
            "black" | "b" => Ok(Side::Black),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// A complete board state in Forsyth-Edwards Notation.
///
/// The string is validated by the rules library on construction and kept
/// verbatim, so a position loaded from storage compares equal to the stored
/// text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Position {
    fen: String,
}

impl Position {
    pub fn initial() -> Self {
        Self {
            fen: STARTING_FEN.to_string(),
        }
    }

    /// Validate `fen` and keep its text as given.
    pub fn from_fen(fen: &str) -> Result<Self, InvalidPosition> {
        if fen.trim() != fen {
            return Err(InvalidPosition(format!("'{fen}' has surrounding whitespace")));
        }
        let position = Self {
            fen: fen.to_string(),
        };
        position.to_chess()?;
        Ok(position)
    }

    pub fn as_fen(&self) -> &str {
        &self.fen
    }

    pub fn side_to_move(&self) -> Side {
        match self.fen.split_whitespace().nth(1) {
            Some("b") => Side::Black,
            _ => Side::White,
        }
    }

    /// Placement, side, castling rights and en passant square. Two positions
    /// with the same key are repetitions of each other.
    pub fn repetition_key(&self) -> String {
        self.fen
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_chess(&self) -> Result<Chess, InvalidPosition> {
        let fen: Fen = self
            .fen
            .parse()
            .map_err(|e| InvalidPosition(format!("{e}: {}", self.fen)))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| InvalidPosition(format!("{e}: {}", self.fen)))
    }

    pub(crate) fn from_chess(pos: &Chess) -> Self {
        Self {
            fen: Fen::from_position(pos, EnPassantMode::Legal).to_string(),
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen)
    }
}

impl TryFrom<String> for Position {
    type Error = InvalidPosition;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_fen(&value)
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        position.fen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_side_to_move() {
        assert_eq!(Position::initial().side_to_move(), Side::White);
    }

    #[test]
    fn test_from_fen_keeps_text() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        let position = Position::from_fen(fen).unwrap();
        assert_eq!(position.as_fen(), fen);
        assert_eq!(position.side_to_move(), Side::Black);
    }

    #[test]
    fn test_from_fen_rejects_padding() {
        assert!(Position::from_fen(&format!(" {STARTING_FEN}\n")).is_err());
    }

    #[test]
    fn test_from_fen_rejects_garbage() {
        assert!(Position::from_fen("not a fen").is_err());
        // Two white kings
        assert!(Position::from_fen("K6K/8/8/8/8/8/8/k7 w - - 0 1").is_err());
    }

    #[test]
    fn test_repetition_key_ignores_clocks() {
        let a = Position::from_fen("8/8/8/8/8/8/8/K1k5 w - - 3 40").unwrap();
        let b = Position::from_fen("8/8/8/8/8/8/8/K1k5 w - - 7 44").unwrap();
        assert_eq!(a.repetition_key(), b.repetition_key());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<Position, _> = serde_json::from_str(&format!("\"{STARTING_FEN}\""));
        assert!(ok.is_ok());
        let bad: Result<Position, _> = serde_json::from_str("\"xyz\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_side_parse() {
        assert_eq!("Black".parse::<Side>().unwrap(), Side::Black);
        assert_eq!("w".parse::<Side>().unwrap(), Side::White);
        assert!("red".parse::<Side>().is_err());
    }
}
