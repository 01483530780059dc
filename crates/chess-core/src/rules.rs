//! Move validation and game termination, delegated to `shakmaty`.

use serde::{Deserialize, Serialize};
use shakmaty::{
    san::{San, SanPlus},
    uci::UciMove,
    CastlingMode, Chess, Move, Position as _, Role, Square,
};

use crate::error::IllegalMove;
use crate::position::{Position, Side};

/// Piece a pawn promotes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    fn role(self) -> Role {
        match self {
            Promotion::Queen => Role::Queen,
            Promotion::Rook => Role::Rook,
            Promotion::Bishop => Role::Bishop,
            Promotion::Knight => Role::Knight,
        }
    }

    fn from_role(role: Role) -> Option<Self> {
        match role {
            Role::Queen => Some(Promotion::Queen),
            Role::Rook => Some(Promotion::Rook),
            Role::Bishop => Some(Promotion::Bishop),
            Role::Knight => Some(Promotion::Knight),
            _ => None,
        }
    }
}

impl std::str::FromStr for Promotion {
    type Err = IllegalMove;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "q" | "queen" => Ok(Promotion::Queen),
            "r" | "rook" => Ok(Promotion::Rook),
            "b" | "bishop" => Ok(Promotion::Bishop),
            "n" | "knight" => Ok(Promotion::Knight),
            other => Err(IllegalMove::InvalidNotation(format!("promotion '{other}'"))),
        }
    }
}

/// A request to move the piece on `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Promotion>,
}

impl MoveRequest {
    pub fn parse(from: &str, to: &str, promotion: Option<Promotion>) -> Result<Self, IllegalMove> {
        Ok(Self {
            from: parse_square(from)?,
            to: parse_square(to)?,
            promotion,
        })
    }

    /// Parse long algebraic engine output such as `e2e4` or `e7e8q`.
    pub fn from_uci(uci: &str) -> Result<Self, IllegalMove> {
        let parsed: UciMove = uci
            .trim()
            .parse()
            .map_err(|_| IllegalMove::InvalidNotation(uci.to_string()))?;
        match parsed {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Ok(Self {
                from,
                to,
                promotion: promotion.and_then(Promotion::from_role),
            }),
            _ => Err(IllegalMove::InvalidNotation(uci.to_string())),
        }
    }

    fn to_uci(&self, promotion: Option<Role>) -> UciMove {
        UciMove::Normal {
            from: self.from,
            to: self.to,
            promotion,
        }
    }
}

fn parse_square(s: &str) -> Result<Square, IllegalMove> {
    s.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| IllegalMove::InvalidSquare(s.to_string()))
}

/// One applied ply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Standard algebraic notation, with `+`/`#` suffix.
    pub notation: String,
    pub uci: String,
    pub resulting_position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawReason {
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Ongoing,
    Checkmate { winner: Side },
    Draw(DrawReason),
}

impl TerminalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TerminalStatus::Ongoing)
    }
}

/// Destination square of a legal move, for move highlighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveTarget {
    pub square: String,
    pub capture: bool,
}

/// SAN move suggestion to be drawn as an arrow.
#[derive(Debug, Clone, Deserialize)]
pub struct ArrowHint {
    pub san: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Arrow {
    pub from: String,
    pub to: String,
    pub color: String,
}

/// The rules capability the session layer depends on.
pub trait RulesEngine: Send + Sync {
    fn apply(
        &self,
        position: &Position,
        request: &MoveRequest,
    ) -> Result<(Position, MoveRecord), IllegalMove>;

    fn terminal_status(&self, position: &Position) -> TerminalStatus;

    fn legal_targets(&self, position: &Position, from: &str) -> Result<Vec<MoveTarget>, IllegalMove>;

    fn resolve_arrows(&self, position: &Position, hints: &[ArrowHint]) -> Vec<Arrow>;
}

/// Standard chess through `shakmaty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl StandardRules {
    fn find_move(chess: &Chess, request: &MoveRequest) -> Result<Move, IllegalMove> {
        let from = request.from.to_string();
        let to = request.to.to_string();

        match request.to_uci(request.promotion.map(Promotion::role)).to_move(chess) {
            Ok(mv) => Ok(mv),
            // A piece hint on a move that does not promote is ignored
            Err(_) if request.promotion.is_some() => request
                .to_uci(None)
                .to_move(chess)
                .map_err(|_| IllegalMove::NotLegal { from, to }),
            Err(_) => {
                if request.to_uci(Some(Role::Queen)).to_move(chess).is_ok() {
                    Err(IllegalMove::PromotionRequired { from, to })
                } else {
                    Err(IllegalMove::NotLegal { from, to })
                }
            }
        }
    }
}

impl RulesEngine for StandardRules {
    fn apply(
        &self,
        position: &Position,
        request: &MoveRequest,
    ) -> Result<(Position, MoveRecord), IllegalMove> {
        let mut chess = position.to_chess()?;
        let mv = Self::find_move(&chess, request)?;

        let san = San::from_move(&chess, mv).to_string();
        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        chess.play_unchecked(mv);

        let suffix = if chess.is_checkmate() {
            "#"
        } else if chess.is_check() {
            "+"
        } else {
            ""
        };

        let resulting_position = Position::from_chess(&chess);
        let record = MoveRecord {
            notation: format!("{san}{suffix}"),
            uci,
            resulting_position: resulting_position.clone(),
        };
        Ok((resulting_position, record))
    }

    fn terminal_status(&self, position: &Position) -> TerminalStatus {
        let Ok(chess) = position.to_chess() else {
            return TerminalStatus::Ongoing;
        };

        if chess.is_checkmate() {
            TerminalStatus::Checkmate {
                winner: Side::from(chess.turn()).opposite(),
            }
        } else if chess.is_stalemate() {
            TerminalStatus::Draw(DrawReason::Stalemate)
        } else if chess.is_insufficient_material() {
            TerminalStatus::Draw(DrawReason::InsufficientMaterial)
        } else if chess.halfmoves() >= 100 {
            TerminalStatus::Draw(DrawReason::FiftyMoveRule)
        } else {
            TerminalStatus::Ongoing
        }
    }

    fn legal_targets(&self, position: &Position, from: &str) -> Result<Vec<MoveTarget>, IllegalMove> {
        let from = parse_square(from)?;
        let chess = position.to_chess()?;

        let mut targets: Vec<MoveTarget> = Vec::new();
        for mv in chess.legal_moves() {
            if mv.from() != Some(from) {
                continue;
            }
            // Castling is reported on the king's destination square
            let UciMove::Normal { to, .. } = mv.to_uci(CastlingMode::Standard) else {
                continue;
            };
            let square = to.to_string();
            // Promotions yield one move per piece
            if targets.iter().any(|t| t.square == square) {
                continue;
            }
            targets.push(MoveTarget {
                square,
                capture: mv.is_capture(),
            });
        }

        Ok(targets)
    }

    fn resolve_arrows(&self, position: &Position, hints: &[ArrowHint]) -> Vec<Arrow> {
        let Ok(chess) = position.to_chess() else {
            return Vec::new();
        };

        hints
            .iter()
            .filter_map(|hint| {
                let san_plus: SanPlus = hint.san.trim().parse().ok()?;
                let mv = san_plus.san.to_move(&chess).ok()?;
                let from = mv.from()?;
                let UciMove::Normal { to, .. } = mv.to_uci(CastlingMode::Standard) else {
                    return None;
                };
                Some(Arrow {
                    from: from.to_string(),
                    to: to.to_string(),
                    color: hint.color.clone(),
                })
            })
            .collect()
    }
}
