use std::env;
use std::str::FromStr;
use std::time::Duration;

use session_sync::{OpponentSettings, PromotionPolicy, SessionConfig};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Postgres URL; rooms live in memory when unset
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    /// Path to a UCI engine binary; engine rooms are disabled when unset
    pub stockfish_path: Option<String>,
    /// Engine processes shared by all rooms
    pub stockfish_engines: usize,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = OpponentSettings::default();

        let opponent = OpponentSettings {
            side: parse_var("OPPONENT_SIDE", defaults.side)?,
            depth: parse_var("OPPONENT_DEPTH", defaults.depth)?,
            timeout: Duration::from_secs(parse_var(
                "OPPONENT_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
            max_attempts: parse_var("OPPONENT_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            backoff: Duration::from_millis(parse_var(
                "OPPONENT_BACKOFF_MS",
                defaults.backoff.as_millis() as u64,
            )?),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            jwt_secret: env::var("JWT_SECRET_KEY")
                .unwrap_or_else(|_| "dev-secret-key-change-in-production".to_string()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            stockfish_path: env::var("STOCKFISH_PATH").ok().filter(|v| !v.is_empty()),
            stockfish_engines: env::var("STOCKFISH_ENGINES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1usize)
                .max(1),
            session: SessionConfig {
                promotion: parse_var("PROMOTION_POLICY", PromotionPolicy::default())?,
                opponent,
            },
        })
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("'{raw}': {e}"),
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::Side;

    #[test]
    fn test_parse_var_falls_back_when_unset() {
        assert_eq!(parse_var::<u32>("CHESS_ROOMS_TEST_UNSET_VAR", 7).unwrap(), 7);
        assert_eq!(
            parse_var::<Side>("CHESS_ROOMS_TEST_UNSET_SIDE", Side::Black).unwrap(),
            Side::Black
        );
    }
}
