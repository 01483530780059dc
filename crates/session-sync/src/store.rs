//! Keyed persistence of one record per room.

use std::collections::HashMap;

use async_trait::async_trait;
use chess_core::Position;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::room::{PlayerAssignment, RoomKey};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Room already has a record: {0}")]
    Conflict(String),

    #[error("Session record not found: {0}")]
    NotFound(i64),

    #[error("Malformed session record: {0}")]
    Malformed(String),
}

/// Persisted state of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub room_key: RoomKey,
    pub fen_description: String,
    pub white_player_id: Option<String>,
    pub black_player_id: Option<String>,
    /// Sequence number of the last write the store accepted
    pub move_seq: u64,
}

impl SessionRecord {
    pub fn players(&self) -> Option<PlayerAssignment> {
        match (&self.white_player_id, &self.black_player_id) {
            (Some(white), Some(black)) => Some(PlayerAssignment::new(white, black)),
            _ => None,
        }
    }
}

/// A record as a backend hands it over, before any field is trusted.
#[derive(Debug, Clone, Default)]
pub struct RawSessionRecord {
    pub id: Option<i64>,
    pub room_key: Option<String>,
    pub fen_description: Option<String>,
    pub white_player_id: Option<String>,
    pub black_player_id: Option<String>,
    pub move_seq: Option<i64>,
}

impl RawSessionRecord {
    pub fn validate(self) -> Result<SessionRecord, StoreError> {
        let id = self
            .id
            .ok_or_else(|| StoreError::Malformed("missing id".into()))?;
        let room_key = self
            .room_key
            .ok_or_else(|| StoreError::Malformed(format!("record {id} has no room key")))
            .and_then(|k| RoomKey::new(&k).map_err(StoreError::Malformed))?;
        let fen_description = self
            .fen_description
            .map(|fen| fen.trim().to_string())
            .ok_or_else(|| StoreError::Malformed(format!("record {id} has no position")))?;
        Position::from_fen(&fen_description)
            .map_err(|e| StoreError::Malformed(format!("record {id}: {e}")))?;
        let move_seq = match self.move_seq {
            None => 0,
            Some(seq) => u64::try_from(seq)
                .map_err(|_| StoreError::Malformed(format!("record {id} has sequence {seq}")))?,
        };

        Ok(SessionRecord {
            id,
            room_key,
            fen_description,
            white_player_id: self.white_player_id.filter(|p| !p.is_empty()),
            black_player_id: self.black_player_id.filter(|p| !p.is_empty()),
            move_seq,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionRecord {
    pub room_key: RoomKey,
    pub fen_description: String,
    pub white_player_id: Option<String>,
    pub black_player_id: Option<String>,
    pub move_seq: u64,
}

/// Partial update. `None` fields are left as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub fen_description: Option<String>,
    pub white_player_id: Option<String>,
    pub black_player_id: Option<String>,
    pub move_seq: u64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find(&self, room_key: &RoomKey) -> Result<Option<SessionRecord>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the room already has a record.
    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError>;

    /// Applies `fields` only when `fields.move_seq` is newer than the stored
    /// sequence; either way returns the record as stored afterwards.
    async fn update(&self, id: i64, fields: SessionUpdate) -> Result<SessionRecord, StoreError>;
}

/// In-process store, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    records: HashMap<i64, SessionRecord>,
    by_room: HashMap<RoomKey, i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find(&self, room_key: &RoomKey) -> Result<Option<SessionRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_room
            .get(room_key)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.by_room.contains_key(&record.room_key) {
            return Err(StoreError::Conflict(record.room_key.to_string()));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let stored = SessionRecord {
            id,
            room_key: record.room_key,
            fen_description: record.fen_description,
            white_player_id: record.white_player_id,
            black_player_id: record.black_player_id,
            move_seq: record.move_seq,
        };
        inner.by_room.insert(stored.room_key.clone(), id);
        inner.records.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: i64, fields: SessionUpdate) -> Result<SessionRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if fields.move_seq > record.move_seq {
            if let Some(fen) = fields.fen_description {
                record.fen_description = fen;
            }
            if let Some(white) = fields.white_player_id {
                record.white_player_id = Some(white);
            }
            if let Some(black) = fields.black_player_id {
                record.black_player_id = Some(black);
            }
            record.move_seq = fields.move_seq;
        }

        Ok(record.clone())
    }
}
