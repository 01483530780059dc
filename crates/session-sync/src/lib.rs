//! Game-session synchronization.
//!
//! A [`Synchronizer`] owns the authoritative position and move history of one
//! room, applies moves from both sides through the rules engine, asks the
//! opponent move source for replies and mirrors every change to the session
//! store.

pub mod config;
pub mod context;
pub mod error;
pub mod opponent;
pub mod persistence;
pub mod room;
pub mod state;
pub mod store;
pub mod synchronizer;

pub use config::{OpponentSettings, PromotionPolicy, SessionConfig};
pub use context::SessionContext;
pub use error::SessionError;
pub use opponent::{OpponentError, OpponentMoveSource, OpponentReply, OpponentTicket};
pub use room::{PlayerAssignment, RoomKey, ENGINE_PLAYER_ID};
pub use state::{GameStatus, SessionNotice, SessionSnapshot, SessionState, SyncPhase};
pub use store::{
    MemoryStore, NewSessionRecord, RawSessionRecord, SessionRecord, SessionStore, SessionUpdate,
    StoreError,
};
pub use synchronizer::{EventOutcome, SessionEvent, Synchronizer};
