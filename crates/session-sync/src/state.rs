use chess_core::{DrawReason, MoveRecord, Position, Side, TerminalStatus};
use serde::Serialize;

use crate::room::{PlayerAssignment, RoomKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameStatus {
    Ongoing,
    Checkmate { winner: Side },
    Draw { reason: DrawReason },
    Resigned { winner: Side },
}

impl GameStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GameStatus::Ongoing)
    }
}

impl From<TerminalStatus> for GameStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Ongoing => GameStatus::Ongoing,
            TerminalStatus::Checkmate { winner } => GameStatus::Checkmate { winner },
            TerminalStatus::Draw(reason) => GameStatus::Draw { reason },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    AwaitingOpponentMove,
    Terminal,
}

/// Authoritative state of one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub room_key: RoomKey,
    pub position: Position,
    pub history: Vec<MoveRecord>,
    pub side_to_move: Side,
    pub status: GameStatus,
}

impl SessionState {
    pub fn new(room_key: RoomKey, position: Position) -> Self {
        Self {
            room_key,
            side_to_move: position.side_to_move(),
            position,
            history: Vec::new(),
            status: GameStatus::Ongoing,
        }
    }
}

/// Non-fatal condition the UI should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionNotice {
    OpponentUnavailable { attempts: u32, reason: String },
}

/// Read-only view handed to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub state: SessionState,
    pub phase: SyncPhase,
    pub players: Option<PlayerAssignment>,
    pub opponent_side: Option<Side>,
    pub notice: Option<SessionNotice>,
    /// Last write the store acknowledged
    pub persisted_seq: u64,
    /// Writes issued but not yet acknowledged
    pub pending_writes: u64,
    /// The latest write failed and waits for the next one
    pub persistence_degraded: bool,
}
