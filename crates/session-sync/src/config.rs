//! Session behaviour knobs.

use std::time::Duration;

use chess_core::{Promotion, Side};

/// How a pawn reaching the last rank picks its piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionPolicy {
    /// Always a queen; hints are ignored.
    AlwaysQueen,
    /// The hint wins, otherwise the default piece.
    Selectable { default: Promotion },
    /// The caller must name the piece.
    Explicit,
}

impl PromotionPolicy {
    pub fn resolve(&self, hint: Option<Promotion>) -> Option<Promotion> {
        match self {
            PromotionPolicy::AlwaysQueen => Some(Promotion::Queen),
            PromotionPolicy::Selectable { default } => Some(hint.unwrap_or(*default)),
            PromotionPolicy::Explicit => hint,
        }
    }
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        PromotionPolicy::Selectable {
            default: Promotion::Queen,
        }
    }
}

impl std::str::FromStr for PromotionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queen" | "always_queen" => Ok(PromotionPolicy::AlwaysQueen),
            "choose" | "selectable" => Ok(PromotionPolicy::default()),
            "explicit" => Ok(PromotionPolicy::Explicit),
            other => Err(format!("unknown promotion policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpponentSettings {
    /// Seat played by the opponent move source when no players are assigned
    pub side: Side,

    /// Search depth passed to the engine
    pub depth: u32,

    /// Time allowed for a single request
    pub timeout: Duration,

    /// Requests per move before giving up, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt
    pub backoff: Duration,
}

impl OpponentSettings {
    /// Delay before `attempt` (1-based). The first attempt starts immediately.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 2).min(16);
        self.backoff.saturating_mul(factor)
    }
}

impl Default for OpponentSettings {
    fn default() -> Self {
        Self {
            side: Side::Black,
            depth: 12,
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub promotion: PromotionPolicy,
    pub opponent: OpponentSettings,
}
