//! Postgres-backed session store.

use async_trait::async_trait;
use session_sync::{
    NewSessionRecord, RawSessionRecord, RoomKey, SessionRecord, SessionStore, SessionUpdate,
    StoreError,
};
use sqlx::PgPool;

/// Row as returned by Postgres. Every column is optional here so that a bad
/// row surfaces as a validation failure instead of a decode panic.
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Option<i64>,
    room_key: Option<String>,
    fen_description: Option<String>,
    white_player_id: Option<String>,
    black_player_id: Option<String>,
    move_seq: Option<i64>,
}

impl SessionRow {
    fn validate(self) -> Result<SessionRecord, StoreError> {
        RawSessionRecord {
            id: self.id,
            room_key: self.room_key,
            fen_description: self.fen_description,
            white_player_id: self.white_player_id,
            black_player_id: self.black_player_id,
            move_seq: self.move_seq,
        }
        .validate()
    }
}

const COLUMNS: &str = "id, room_key, fen_description, white_player_id, black_player_id, move_seq";

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_by_id(&self, id: i64) -> Result<Option<SessionRecord>, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM game_sessions WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.map(SessionRow::validate).transpose()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find(&self, room_key: &RoomKey) -> Result<Option<SessionRecord>, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM game_sessions WHERE room_key = $1"))
                .bind(room_key.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.map(SessionRow::validate).transpose()
    }

    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            r#"INSERT INTO game_sessions (
                room_key, fen_description, white_player_id, black_player_id, move_seq
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (room_key) DO NOTHING
            RETURNING {COLUMNS}"#
        ))
        .bind(record.room_key.as_str())
        .bind(&record.fen_description)
        .bind(&record.white_player_id)
        .bind(&record.black_player_id)
        .bind(record.move_seq as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row.validate(),
            None => Err(StoreError::Conflict(record.room_key.to_string())),
        }
    }

    async fn update(&self, id: i64, fields: SessionUpdate) -> Result<SessionRecord, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            r#"UPDATE game_sessions SET
                fen_description = COALESCE($2, fen_description),
                white_player_id = COALESCE($3, white_player_id),
                black_player_id = COALESCE($4, black_player_id),
                move_seq = $5,
                updated_at = NOW()
            WHERE id = $1 AND move_seq < $5
            RETURNING {COLUMNS}"#
        ))
        .bind(id)
        .bind(&fields.fen_description)
        .bind(&fields.white_player_id)
        .bind(&fields.black_player_id)
        .bind(fields.move_seq as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row.validate(),
            // Either a newer write already landed or the record is gone
            None => self.fetch_by_id(id).await?.ok_or(StoreError::NotFound(id)),
        }
    }
}
