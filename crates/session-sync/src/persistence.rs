//! Sequenced, fire-and-forget writes of session state.
//!
//! Every mutation issues a write carrying the full room state and a sequence
//! number. The store only accepts a write newer than what it holds, and the
//! synchronizer only trusts acknowledgements for the latest sequence, so
//! reordered writes converge on the newest state.

use tracing::{debug, warn};

use crate::room::{PlayerAssignment, RoomKey};
use crate::store::{NewSessionRecord, SessionRecord, SessionStore, SessionUpdate, StoreError};

/// Everything one write needs, detached from the synchronizer.
#[derive(Debug, Clone)]
pub struct PersistJob {
    pub seq: u64,
    pub record_id: Option<i64>,
    pub room_key: RoomKey,
    pub fen_description: String,
    pub players: Option<PlayerAssignment>,
}

impl PersistJob {
    fn update(&self) -> SessionUpdate {
        SessionUpdate {
            fen_description: Some(self.fen_description.clone()),
            white_player_id: self.players.as_ref().map(|p| p.white_player_id.clone()),
            black_player_id: self.players.as_ref().map(|p| p.black_player_id.clone()),
            move_seq: self.seq,
        }
    }

    fn new_record(&self) -> NewSessionRecord {
        NewSessionRecord {
            room_key: self.room_key.clone(),
            fen_description: self.fen_description.clone(),
            white_player_id: self.players.as_ref().map(|p| p.white_player_id.clone()),
            black_player_id: self.players.as_ref().map(|p| p.black_player_id.clone()),
            move_seq: self.seq,
        }
    }

    /// Create the room record on first write, update it afterwards.
    pub async fn run(&self, store: &dyn SessionStore) -> Result<SessionRecord, StoreError> {
        let existing = match self.record_id {
            Some(id) => Some(id),
            None => store.find(&self.room_key).await?.map(|r| r.id),
        };

        if let Some(id) = existing {
            return store.update(id, self.update()).await;
        }

        match store.create(self.new_record()).await {
            // Another write created the record first
            Err(StoreError::Conflict(_)) => {
                let record = store
                    .find(&self.room_key)
                    .await?
                    .ok_or_else(|| StoreError::Backend(format!("room {} vanished", self.room_key)))?;
                store.update(record.id, self.update()).await
            }
            other => other,
        }
    }
}

/// Result of feeding an acknowledgement into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Accepted,
    Superseded,
    /// The store kept a record at or past this sequence written by someone
    /// else; the write did not land.
    Diverged { stored_seq: u64 },
    Failed(StoreError),
}

#[derive(Debug, Default, Clone)]
pub struct PersistenceTracker {
    issued: u64,
    acknowledged: u64,
    record_id: Option<i64>,
    failed_seq: Option<u64>,
}

impl PersistenceTracker {
    /// Continue numbering after a loaded record.
    pub fn resume(&mut self, record: &SessionRecord) {
        self.record_id = Some(record.id);
        self.issued = self.issued.max(record.move_seq);
        self.acknowledged = self.acknowledged.max(record.move_seq);
        self.failed_seq = None;
    }

    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn record_id(&self) -> Option<i64> {
        self.record_id
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    pub fn is_degraded(&self) -> bool {
        self.failed_seq.is_some()
    }

    pub fn acknowledge(
        &mut self,
        seq: u64,
        result: Result<SessionRecord, StoreError>,
    ) -> Acknowledgement {
        // The record id never changes once created, whatever the write
        if let Ok(record) = &result {
            self.record_id.get_or_insert(record.id);
        }

        if seq < self.issued {
            debug!(seq, latest = self.issued, "Discarding superseded store response");
            return Acknowledgement::Superseded;
        }

        match result {
            Ok(record) if record.move_seq != seq => {
                warn!(
                    seq,
                    stored_seq = record.move_seq,
                    "Store holds a write this session did not issue"
                );
                // Number the next write past whatever the store holds
                self.issued = self.issued.max(record.move_seq);
                self.failed_seq = Some(seq);
                Acknowledgement::Diverged {
                    stored_seq: record.move_seq,
                }
            }
            Ok(_) => {
                self.acknowledged = seq;
                self.failed_seq = None;
                Acknowledgement::Accepted
            }
            Err(e) => {
                warn!(seq, error = %e, "Session write failed, retrying with the next write");
                self.failed_seq = Some(seq);
                Acknowledgement::Failed(e)
            }
        }
    }
}
