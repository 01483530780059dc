use thiserror::Error;

/// A FEN string the rules library refuses to load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid position: {0}")]
pub struct InvalidPosition(pub String);

/// A move request rejected by the rules engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IllegalMove {
    #[error("Invalid square: {0}")]
    InvalidSquare(String),

    #[error("Invalid move notation: {0}")]
    InvalidNotation(String),

    #[error("Illegal move {from}{to}")]
    NotLegal { from: String, to: String },

    #[error("Move {from}{to} promotes and needs a piece")]
    PromotionRequired { from: String, to: String },

    #[error(transparent)]
    Position(#[from] InvalidPosition),
}
