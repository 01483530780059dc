#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chess_core::{Position, StandardRules};
use reqwest::Client;
use server::config::Config;
use server::rooms::RoomHub;
use session_sync::{
    EventOutcome, MemoryStore, NewSessionRecord, OpponentError, OpponentMoveSource,
    OpponentSettings, RoomKey, SessionConfig, SessionContext, SessionEvent, SessionRecord,
    SessionStore, SessionUpdate, StoreError, Synchronizer,
};
use tokio::sync::{mpsc, oneshot, Mutex};

pub const JWT_SECRET: &str = "test-secret";

/// Build a reqwest client for tests.
pub fn client() -> Client {
    Client::new()
}

/// Session settings with short opponent timings so retry tests stay fast.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        opponent: OpponentSettings {
            timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(10),
            ..OpponentSettings::default()
        },
        ..SessionConfig::default()
    }
}

pub fn context(store: Arc<dyn SessionStore>, config: SessionConfig) -> SessionContext {
    SessionContext::new(Arc::new(StandardRules), store, config)
}

pub fn room(key: &str) -> RoomKey {
    RoomKey::new(key).unwrap()
}

// ---------------------------------------------------------------------------
// Driving a synchronizer
// ---------------------------------------------------------------------------

/// Wait for the next background event and feed it to the synchronizer.
pub async fn next_outcome(
    sync: &mut Synchronizer,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> EventOutcome {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timed out waiting for a session event")
        .expect("Session event channel closed");
    sync.handle_event(event)
}

/// Handle events until every issued write has been acknowledged.
pub async fn settle(sync: &mut Synchronizer, events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    while sync.persisted_seq() < sync.issued_seq() {
        next_outcome(sync, events).await;
    }
}

/// Handle events until one matches `pred`, returning it.
pub async fn wait_for<F>(
    sync: &mut Synchronizer,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    pred: F,
) -> EventOutcome
where
    F: Fn(&EventOutcome) -> bool,
{
    loop {
        let outcome = next_outcome(sync, events).await;
        if pred(&outcome) {
            return outcome;
        }
    }
}

// ---------------------------------------------------------------------------
// Opponents
// ---------------------------------------------------------------------------

/// An opponent request held by the test until it answers.
pub struct PendingRequest {
    pub position: Position,
    pub depth: u32,
    respond: oneshot::Sender<Result<String, OpponentError>>,
}

impl PendingRequest {
    pub fn answer(self, uci: &str) {
        let _ = self.respond.send(Ok(uci.to_string()));
    }

    pub fn fail(self, reason: &str) {
        let _ = self.respond.send(Err(OpponentError::Engine(reason.to_string())));
    }
}

/// Opponent whose replies are supplied by hand.
pub struct ManualOpponent {
    requests: mpsc::UnboundedSender<PendingRequest>,
}

impl ManualOpponent {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { requests }), receiver)
    }
}

#[async_trait]
impl OpponentMoveSource for ManualOpponent {
    async fn request_move(&self, position: &Position, depth: u32) -> Result<String, OpponentError> {
        let (respond, response) = oneshot::channel();
        self.requests
            .send(PendingRequest {
                position: position.clone(),
                depth,
                respond,
            })
            .map_err(|_| OpponentError::Engine("test dropped the request queue".into()))?;
        response
            .await
            .map_err(|_| OpponentError::Engine("request dropped".into()))?
    }
}

/// Opponent that plays a fixed list of moves, optionally after a delay.
/// Runs out of moves with an engine error.
pub struct ScriptedOpponent {
    moves: Mutex<VecDeque<String>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedOpponent {
    pub fn new(moves: &[&str]) -> Arc<Self> {
        Self::with_delay(moves, Duration::ZERO)
    }

    pub fn with_delay(moves: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            moves: Mutex::new(moves.iter().map(|m| m.to_string()).collect()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpponentMoveSource for ScriptedOpponent {
    async fn request_move(&self, _position: &Position, _depth: u32) -> Result<String, OpponentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.moves
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| OpponentError::Engine("script exhausted".into()))
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// In-memory store that holds back the writes of chosen sequence numbers so
/// they complete out of order.
pub struct ReorderingStore {
    inner: MemoryStore,
    delays: HashMap<u64, Duration>,
}

impl ReorderingStore {
    pub fn new(delays: &[(u64, u64)]) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            delays: delays
                .iter()
                .map(|(seq, ms)| (*seq, Duration::from_millis(*ms)))
                .collect(),
        })
    }

    async fn hold(&self, seq: u64) {
        if let Some(delay) = self.delays.get(&seq) {
            tokio::time::sleep(*delay).await;
        }
    }
}

#[async_trait]
impl SessionStore for ReorderingStore {
    async fn find(&self, room_key: &RoomKey) -> Result<Option<SessionRecord>, StoreError> {
        self.inner.find(room_key).await
    }

    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        self.hold(record.move_seq).await;
        self.inner.create(record).await
    }

    async fn update(&self, id: i64, fields: SessionUpdate) -> Result<SessionRecord, StoreError> {
        self.hold(fields.move_seq).await;
        self.inner.update(id, fields).await
    }
}

/// Store whose every call fails.
pub struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn find(&self, _room_key: &RoomKey) -> Result<Option<SessionRecord>, StoreError> {
        Err(StoreError::Backend("database unavailable".into()))
    }

    async fn create(&self, _record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        Err(StoreError::Backend("database unavailable".into()))
    }

    async fn update(&self, _id: i64, _fields: SessionUpdate) -> Result<SessionRecord, StoreError> {
        Err(StoreError::Backend("database unavailable".into()))
    }
}

/// In-memory store whose first `failures` calls fail, as after a dropped
/// connection that later recovers.
pub struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
        })
    }

    fn trip(&self) -> Result<(), StoreError> {
        let left = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match left {
            Ok(_) => Err(StoreError::Backend("connection reset".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn find(&self, room_key: &RoomKey) -> Result<Option<SessionRecord>, StoreError> {
        self.trip()?;
        self.inner.find(room_key).await
    }

    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        self.trip()?;
        self.inner.create(record).await
    }

    async fn update(&self, id: i64, fields: SessionUpdate) -> Result<SessionRecord, StoreError> {
        self.trip()?;
        self.inner.update(id, fields).await
    }
}

/// In-memory store whose lookups of one room stall.
pub struct SlowFindStore {
    inner: MemoryStore,
    slow_room: RoomKey,
    delay: Duration,
}

impl SlowFindStore {
    pub fn new(slow_room: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            slow_room: room(slow_room),
            delay,
        })
    }
}

#[async_trait]
impl SessionStore for SlowFindStore {
    async fn find(&self, room_key: &RoomKey) -> Result<Option<SessionRecord>, StoreError> {
        if *room_key == self.slow_room {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.find(room_key).await
    }

    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        self.inner.create(record).await
    }

    async fn update(&self, id: i64, fields: SessionUpdate) -> Result<SessionRecord, StoreError> {
        self.inner.update(id, fields).await
    }
}

// ---------------------------------------------------------------------------
// In-process server
// ---------------------------------------------------------------------------

pub struct TestServer {
    pub base_url: String,
    pub store: Arc<dyn SessionStore>,
}

impl TestServer {
    pub async fn spawn(opponent: Option<Arc<dyn OpponentMoveSource>>) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), opponent).await
    }

    pub async fn with_store(
        store: Arc<dyn SessionStore>,
        opponent: Option<Arc<dyn OpponentMoveSource>>,
    ) -> Self {
        let config = Config {
            database_url: None,
            jwt_secret: JWT_SECRET.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            stockfish_path: None,
            stockfish_engines: 1,
            session: fast_config(),
        };

        let mut ctx = context(store.clone(), config.session.clone());
        if let Some(opponent) = opponent {
            ctx = ctx.with_opponent(opponent);
        }
        let app = server::app(Arc::new(RoomHub::new(ctx)), config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server error");
        });

        Self {
            base_url: format!("http://{addr}"),
            store,
        }
    }

    /// Build a URL for an API endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Bearer token for `player_id`, signed the way the identity provider does.
pub fn token(player_id: &str) -> String {
    server::auth::jwt::create_token(player_id, JWT_SECRET, 1).expect("Failed to sign token")
}
