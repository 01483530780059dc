//! Chess rules adapter over `shakmaty`.
//!
//! Everything above this crate treats positions as immutable FEN values and
//! asks [`RulesEngine`] whether a move is legal and whether the game is over.

pub mod error;
pub mod position;
pub mod rules;

pub use error::{IllegalMove, InvalidPosition};
pub use position::{Position, Side, STARTING_FEN};
pub use rules::{
    Arrow, ArrowHint, DrawReason, MoveRecord, MoveRequest, MoveTarget, Promotion, RulesEngine,
    StandardRules, TerminalStatus,
};
