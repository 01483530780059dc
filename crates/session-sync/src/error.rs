//! Session error types

use chess_core::IllegalMove;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    IllegalMove(#[from] IllegalMove),

    #[error("Game is over")]
    GameOver,

    #[error("No move to undo")]
    EmptyHistory,

    #[error("It is the opponent's turn")]
    OpponentToMove,

    #[error("It is not the opponent's turn")]
    NotOpponentTurn,

    #[error("Players are already assigned")]
    PlayersAlreadyAssigned,

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}
