use sqlx::postgres::{PgPool, PgPoolOptions};

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run the full Postgres schema migration inline.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- One row per game room
CREATE TABLE IF NOT EXISTS game_sessions (
    id               BIGSERIAL PRIMARY KEY,
    room_key         TEXT NOT NULL,
    fen_description  TEXT NOT NULL,
    white_player_id  TEXT,
    black_player_id  TEXT,
    move_seq         BIGINT NOT NULL DEFAULT 0,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_game_sessions_room_key
    ON game_sessions (room_key);
CREATE INDEX IF NOT EXISTS idx_game_sessions_white
    ON game_sessions (white_player_id);
CREATE INDEX IF NOT EXISTS idx_game_sessions_black
    ON game_sessions (black_player_id);
"#;
