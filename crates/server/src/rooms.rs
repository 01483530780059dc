//! Live rooms. Each room is a task that owns one [`Synchronizer`] and
//! serializes every command and background event through a single loop.

use std::collections::HashMap;
use std::time::Duration;

use chess_core::Side;
use session_sync::{
    EventOutcome, PlayerAssignment, RoomKey, SessionContext, SessionEvent, SessionSnapshot,
    Synchronizer, ENGINE_PLAYER_ID,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::AppError;

/// How long a closing room waits for its outstanding writes.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Synchronizer) + Send>;

enum RoomCommand {
    Run(Job),
    Close(oneshot::Sender<()>),
}

#[derive(Clone)]
struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
}

enum RoomSlot {
    Live(RoomHandle),
    /// Being revived or flushed. The sender side is dropped when done.
    Busy(watch::Receiver<()>),
}

enum Claim {
    Live(RoomHandle),
    Wait(watch::Receiver<()>),
    Revive(watch::Sender<()>),
}

pub struct RoomHub {
    ctx: SessionContext,
    rooms: Mutex<HashMap<RoomKey, RoomSlot>>,
}

impl RoomHub {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_engine(&self) -> bool {
        self.ctx.opponent.is_some()
    }

    pub async fn live_rooms(&self) -> usize {
        self.rooms
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, RoomSlot::Live(_)))
            .count()
    }

    /// Open the room for `players`, resuming the stored game when one exists.
    /// A stored game keeps its original seats.
    pub async fn open(
        &self,
        room_key: RoomKey,
        players: PlayerAssignment,
    ) -> Result<SessionSnapshot, AppError> {
        let handle = self.acquire(&room_key, Some(players)).await?;
        call(&handle, |sync| Ok(sync.snapshot())).await
    }

    /// Run `f` against the room's synchronizer, reviving the room from the
    /// store if it is not live.
    pub async fn call<R, F>(&self, room_key: &RoomKey, f: F) -> Result<R, AppError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Synchronizer) -> Result<R, AppError> + Send + 'static,
    {
        let handle = self.acquire(room_key, None).await?;
        call(&handle, f).await
    }

    /// Tear the room down after flushing its pending writes. Requests for the
    /// room wait until the flush is over and then revive it from the store.
    pub async fn close(&self, room_key: &RoomKey) -> Result<(), AppError> {
        let (flushing, waiting) = watch::channel(());
        let handle = {
            let mut rooms = self.rooms.lock().await;
            let handle = match rooms.get(room_key) {
                Some(RoomSlot::Live(handle)) => handle.clone(),
                _ => return Err(AppError::NotFound(format!("Room {room_key} is not open"))),
            };
            rooms.insert(room_key.clone(), RoomSlot::Busy(waiting));
            handle
        };

        let (done, flushed) = oneshot::channel();
        if handle.commands.send(RoomCommand::Close(done)).is_ok() {
            let _ = flushed.await;
        }

        self.rooms.lock().await.remove(room_key);
        drop(flushing);
        Ok(())
    }

    /// The live handle of a room. The hub lock is never held across store
    /// I/O; concurrent callers for the same cold room wait for one revival.
    async fn acquire(
        &self,
        room_key: &RoomKey,
        players: Option<PlayerAssignment>,
    ) -> Result<RoomHandle, AppError> {
        loop {
            match self.claim(room_key).await {
                Claim::Live(handle) => return Ok(handle),
                Claim::Wait(mut busy) => {
                    // Errors once the owner drops its sender
                    let _ = busy.changed().await;
                }
                Claim::Revive(reviving) => {
                    let revived = self.revive(room_key, players).await;
                    let mut rooms = self.rooms.lock().await;
                    let result = match revived {
                        Ok(handle) => {
                            rooms.insert(room_key.clone(), RoomSlot::Live(handle.clone()));
                            Ok(handle)
                        }
                        Err(e) => {
                            rooms.remove(room_key);
                            Err(e)
                        }
                    };
                    drop(rooms);
                    drop(reviving);
                    return result;
                }
            }
        }
    }

    async fn claim(&self, room_key: &RoomKey) -> Claim {
        let mut rooms = self.rooms.lock().await;
        match rooms.get(room_key) {
            Some(RoomSlot::Live(handle)) if !handle.commands.is_closed() => {
                return Claim::Live(handle.clone())
            }
            Some(RoomSlot::Busy(busy)) => return Claim::Wait(busy.clone()),
            _ => {}
        }

        let (reviving, waiting) = watch::channel(());
        rooms.insert(room_key.clone(), RoomSlot::Busy(waiting));
        Claim::Revive(reviving)
    }

    async fn revive(
        &self,
        room_key: &RoomKey,
        players: Option<PlayerAssignment>,
    ) -> Result<RoomHandle, AppError> {
        let (mut sync, events) = match self.resume(room_key).await? {
            Some(resumed) => resumed,
            None if players.is_some() => Synchronizer::new(self.ctx.clone(), room_key.clone()),
            None => return Err(AppError::NotFound(format!("Room {room_key} not found"))),
        };
        if let Some(players) = players {
            if sync.players().is_none() {
                sync.assign_players(players)?;
            }
        }
        Ok(spawn_room((sync, events)))
    }

    async fn resume(
        &self,
        room_key: &RoomKey,
    ) -> Result<Option<(Synchronizer, mpsc::UnboundedReceiver<SessionEvent>)>, AppError> {
        let Some(record) = self.ctx.store.find(room_key).await? else {
            return Ok(None);
        };

        let (mut sync, events) = Synchronizer::new(self.ctx.clone(), room_key.clone());
        sync.load_session(&record)?;
        Ok(Some((sync, events)))
    }
}

async fn call<R, F>(handle: &RoomHandle, f: F) -> Result<R, AppError>
where
    R: Send + 'static,
    F: FnOnce(&mut Synchronizer) -> Result<R, AppError> + Send + 'static,
{
    let (reply, response) = oneshot::channel();
    let job: Job = Box::new(move |sync| {
        let _ = reply.send(f(sync));
    });

    handle
        .commands
        .send(RoomCommand::Run(job))
        .map_err(|_| AppError::NotFound("Room is closed".into()))?;
    response
        .await
        .map_err(|_| AppError::Internal("Room stopped while handling a request".into()))?
}

fn spawn_room(
    (sync, events): (Synchronizer, mpsc::UnboundedReceiver<SessionEvent>),
) -> RoomHandle {
    let (commands, receiver) = mpsc::unbounded_channel();
    tokio::spawn(run_room(sync, events, receiver));
    RoomHandle { commands }
}

async fn run_room(
    mut sync: Synchronizer,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
) {
    let room = sync.state().room_key.clone();
    info!(%room, "Room opened");

    let closed = loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let outcome = sync.handle_event(event);
                debug!(%room, ?outcome, "Room event");
            }
            command = commands.recv() => match command {
                Some(RoomCommand::Run(job)) => job(&mut sync),
                Some(RoomCommand::Close(done)) => break Some(done),
                None => break None,
            },
        }
    };

    flush(&mut sync, &mut events).await;
    drop(sync);
    info!(%room, "Room closed");
    if let Some(done) = closed {
        let _ = done.send(());
    }
}

/// Wait until the latest write is acknowledged, it fails, or time runs out.
async fn flush(sync: &mut Synchronizer, events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    let deadline = tokio::time::Instant::now() + FLUSH_TIMEOUT;
    while sync.persisted_seq() < sync.issued_seq() {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => {
                if let EventOutcome::PersistFailed { seq } = sync.handle_event(event) {
                    if seq == sync.issued_seq() {
                        break;
                    }
                }
            }
            _ => {
                warn!(
                    room = %sync.state().room_key,
                    pending = sync.issued_seq() - sync.persisted_seq(),
                    "Closing room with unacknowledged writes"
                );
                break;
            }
        }
    }
}

/// Sides `player_id` controls in this room.
pub fn seats_of(sync: &Synchronizer, player_id: &str) -> Result<Vec<Side>, AppError> {
    if player_id == ENGINE_PLAYER_ID {
        return Err(AppError::Forbidden("Reserved player id".into()));
    }
    let sides = sync
        .players()
        .map(|players| players.sides_of(player_id))
        .unwrap_or_default();
    if sides.is_empty() {
        return Err(AppError::Forbidden("Not a participant in this room".into()));
    }
    Ok(sides)
}
