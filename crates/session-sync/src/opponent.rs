//! The out-of-band move source playing the opponent's seat.

use std::time::Duration;

use async_trait::async_trait;
use chess_core::Position;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpponentError {
    #[error("Opponent did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Opponent engine error: {0}")]
    Engine(String),

    #[error("Opponent move rejected: {0}")]
    Rejected(String),
}

/// Anything that can suggest a move for a position: a local engine process,
/// a remote service, a test double.
#[async_trait]
pub trait OpponentMoveSource: Send + Sync {
    /// Best move for the side to move, in UCI notation (`e7e5`, `a2a1q`).
    async fn request_move(&self, position: &Position, depth: u32) -> Result<String, OpponentError>;
}

/// Identifies one issued request. Only the most recent ticket is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpponentTicket(pub u64);

/// The resolution of an opponent request, routed back to the synchronizer.
#[derive(Debug, Clone)]
pub struct OpponentReply {
    pub ticket: OpponentTicket,
    /// Position the request was computed for
    pub requested_for: Position,
    /// 1-based attempt number for the current move
    pub attempt: u32,
    pub outcome: Result<String, OpponentError>,
}
