//! The authoritative state machine of one game room.
//!
//! All mutation happens on the owner's thread of control. Opponent requests
//! and store writes run as detached tasks and report back through the event
//! channel returned by [`Synchronizer::new`]; the owner passes each event to
//! [`Synchronizer::handle_event`].

use std::sync::Arc;

use chess_core::{Arrow, ArrowHint, MoveRecord, MoveRequest, MoveTarget, Position, Promotion, Side};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::SessionContext;
use crate::error::SessionError;
use crate::opponent::{OpponentError, OpponentReply, OpponentTicket};
use crate::persistence::{Acknowledgement, PersistJob, PersistenceTracker};
use crate::room::{PlayerAssignment, RoomKey};
use crate::state::{GameStatus, SessionNotice, SessionSnapshot, SessionState, SyncPhase};
use crate::store::{SessionRecord, StoreError};

/// Results of background work, delivered to the owner of a synchronizer.
#[derive(Debug)]
pub enum SessionEvent {
    Opponent(OpponentReply),
    Persisted {
        seq: u64,
        result: Result<SessionRecord, StoreError>,
    },
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Reply to a cancelled request
    Ignored,
    OpponentMoved(MoveRecord),
    /// Reply computed for another position; a fresh request was issued
    StaleDiscarded,
    OpponentRetrying { attempt: u32 },
    Notice(SessionNotice),
    Persisted { seq: u64 },
    PersistSuperseded { seq: u64 },
    /// The store held another writer's state; the session was written again
    PersistDiverged { seq: u64 },
    PersistFailed { seq: u64 },
}

struct InFlight {
    ticket: OpponentTicket,
    handle: JoinHandle<()>,
}

pub struct Synchronizer {
    ctx: SessionContext,
    state: SessionState,
    /// Position before the first recorded ply; where undo bottoms out
    base_position: Position,
    phase: SyncPhase,
    players: Option<PlayerAssignment>,
    opponent_side: Option<Side>,
    next_ticket: u64,
    in_flight: Option<InFlight>,
    persistence: PersistenceTracker,
    notice: Option<SessionNotice>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Synchronizer {
    pub fn new(
        ctx: SessionContext,
        room_key: RoomKey,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let opponent_side = ctx.opponent.as_ref().map(|_| ctx.config.opponent.side);
        let position = Position::initial();

        let sync = Self {
            ctx,
            state: SessionState::new(room_key, position.clone()),
            base_position: position,
            phase: SyncPhase::Idle,
            players: None,
            opponent_side,
            next_ticket: 0,
            in_flight: None,
            persistence: PersistenceTracker::default(),
            notice: None,
            events,
        };
        (sync, receiver)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn players(&self) -> Option<&PlayerAssignment> {
        self.players.as_ref()
    }

    pub fn opponent_side(&self) -> Option<Side> {
        self.opponent_side
    }

    pub fn notice(&self) -> Option<&SessionNotice> {
        self.notice.as_ref()
    }

    /// Ticket of the opponent request currently in flight.
    pub fn pending_ticket(&self) -> Option<OpponentTicket> {
        self.in_flight.as_ref().map(|f| f.ticket)
    }

    pub fn persisted_seq(&self) -> u64 {
        self.persistence.acknowledged()
    }

    pub fn issued_seq(&self) -> u64 {
        self.persistence.issued()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            phase: self.phase,
            players: self.players.clone(),
            opponent_side: self.opponent_side,
            notice: self.notice.clone(),
            persisted_seq: self.persistence.acknowledged(),
            pending_writes: self.persistence.issued() - self.persistence.acknowledged(),
            persistence_degraded: self.persistence.is_degraded(),
        }
    }

    pub fn legal_targets(&self, square: &str) -> Result<Vec<MoveTarget>, SessionError> {
        Ok(self.ctx.rules.legal_targets(&self.state.position, square)?)
    }

    pub fn arrows(&self, hints: &[ArrowHint]) -> Vec<Arrow> {
        self.ctx.rules.resolve_arrows(&self.state.position, hints)
    }

    /// Seat the players. The assignment cannot change afterwards.
    pub fn assign_players(&mut self, players: PlayerAssignment) -> Result<(), SessionError> {
        match &self.players {
            Some(existing) if *existing == players => return Ok(()),
            Some(_) => return Err(SessionError::PlayersAlreadyAssigned),
            None => {}
        }

        self.opponent_side = self.seat_for_opponent(Some(&players));
        info!(
            room = %self.state.room_key,
            white = %players.white_player_id,
            black = %players.black_player_id,
            "Players assigned"
        );
        self.players = Some(players);
        self.ensure_opponent_request();
        Ok(())
    }

    /// Play a move for the side to move.
    pub fn submit_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
    ) -> Result<MoveRecord, SessionError> {
        if self.phase == SyncPhase::Terminal {
            return Err(SessionError::GameOver);
        }
        if self.opponent_side == Some(self.state.side_to_move) {
            return Err(SessionError::OpponentToMove);
        }

        let request = MoveRequest::parse(from, to, self.ctx.config.promotion.resolve(promotion))?;
        let (_, record) = self.ctx.rules.apply(&self.state.position, &request)?;

        debug!(room = %self.state.room_key, notation = %record.notation, "Move played");
        self.commit(record.clone());
        Ok(record)
    }

    /// Apply the resolution of an opponent request.
    pub fn apply_opponent_move(&mut self, reply: OpponentReply) -> EventOutcome {
        if self.pending_ticket() != Some(reply.ticket) {
            debug!(
                room = %self.state.room_key,
                ticket = reply.ticket.0,
                "Ignoring reply to a cancelled opponent request"
            );
            return EventOutcome::Ignored;
        }
        self.in_flight = None;

        let uci = match reply.outcome {
            Ok(uci) => uci,
            Err(e) => return self.retry_opponent(reply.attempt, e),
        };

        if reply.requested_for != self.state.position {
            debug!(room = %self.state.room_key, uci = %uci, "Discarding stale opponent move");
            self.phase = SyncPhase::Idle;
            self.ensure_opponent_request();
            return EventOutcome::StaleDiscarded;
        }

        let applied = MoveRequest::from_uci(&uci)
            .and_then(|request| self.ctx.rules.apply(&self.state.position, &request));
        match applied {
            Ok((_, record)) => {
                debug!(room = %self.state.room_key, notation = %record.notation, "Opponent moved");
                self.commit(record.clone());
                EventOutcome::OpponentMoved(record)
            }
            Err(e) => {
                warn!(room = %self.state.room_key, uci = %uci, error = %e, "Opponent suggested an illegal move");
                self.retry_opponent(reply.attempt, OpponentError::Rejected(format!("{uci}: {e}")))
            }
        }
    }

    /// Take back the most recent ply.
    pub fn undo_last(&mut self) -> Result<(), SessionError> {
        self.rewind(false).map(|_| ())
    }

    /// Take back plies until a seat the opponent does not hold is to move,
    /// so an engine reply and the move before it go together. Returns the
    /// number of plies removed.
    pub fn undo_turn(&mut self) -> Result<usize, SessionError> {
        self.rewind(true)
    }

    fn rewind(&mut self, whole_turn: bool) -> Result<usize, SessionError> {
        if self.phase == SyncPhase::Terminal {
            return Err(SessionError::GameOver);
        }
        if self.state.history.is_empty() {
            return Err(SessionError::EmptyHistory);
        }

        self.cancel_opponent();
        let mut undone = 0;
        while self.state.history.pop().is_some() {
            undone += 1;
            self.state.position = self
                .state
                .history
                .last()
                .map(|r| r.resulting_position.clone())
                .unwrap_or_else(|| self.base_position.clone());
            self.state.side_to_move = self.state.position.side_to_move();

            if !whole_turn || self.opponent_side != Some(self.state.side_to_move) {
                break;
            }
        }
        self.notice = None;

        debug!(room = %self.state.room_key, undone, plies = self.state.history.len(), "Moves undone");
        self.persist();
        self.ensure_opponent_request();
        Ok(undone)
    }

    /// Start over from the initial position.
    pub fn reset_session(&mut self) {
        self.cancel_opponent();
        let position = Position::initial();
        self.state = SessionState::new(self.state.room_key.clone(), position.clone());
        self.base_position = position;
        self.phase = SyncPhase::Idle;
        self.notice = None;

        info!(room = %self.state.room_key, "Session reset");
        self.persist();
        self.ensure_opponent_request();
    }

    /// Replace the whole state from a persisted record.
    pub fn load_session(&mut self, record: &SessionRecord) -> Result<(), SessionError> {
        let position = Position::from_fen(&record.fen_description)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        self.cancel_opponent();
        self.state = SessionState::new(record.room_key.clone(), position.clone());
        self.base_position = position;
        self.state.status = self.evaluate_status();
        self.phase = if self.state.status.is_terminal() {
            SyncPhase::Terminal
        } else {
            SyncPhase::Idle
        };
        self.players = record.players();
        self.opponent_side = self.seat_for_opponent(self.players.as_ref());
        self.persistence.resume(record);
        self.notice = None;

        info!(
            room = %self.state.room_key,
            record_id = record.id,
            move_seq = record.move_seq,
            "Session loaded"
        );
        self.ensure_opponent_request();
        Ok(())
    }

    pub fn resign(&mut self, side: Side) -> Result<(), SessionError> {
        if self.phase == SyncPhase::Terminal {
            return Err(SessionError::GameOver);
        }

        self.cancel_opponent();
        self.state.status = GameStatus::Resigned {
            winner: side.opposite(),
        };
        self.phase = SyncPhase::Terminal;
        self.notice = None;

        info!(room = %self.state.room_key, %side, "Side resigned");
        self.persist();
        Ok(())
    }

    /// Ask the opponent again, e.g. after retries ran out.
    pub fn request_opponent_move(&mut self) -> Result<(), SessionError> {
        if self.phase == SyncPhase::Terminal {
            return Err(SessionError::GameOver);
        }
        if self.opponent_side != Some(self.state.side_to_move) {
            return Err(SessionError::NotOpponentTurn);
        }

        self.notice = None;
        if self.in_flight.is_none() {
            self.schedule_opponent(1);
        }
        Ok(())
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> EventOutcome {
        match event {
            SessionEvent::Opponent(reply) => self.apply_opponent_move(reply),
            SessionEvent::Persisted { seq, result } => {
                match self.persistence.acknowledge(seq, result) {
                    Acknowledgement::Accepted => EventOutcome::Persisted { seq },
                    Acknowledgement::Superseded => EventOutcome::PersistSuperseded { seq },
                    Acknowledgement::Diverged { .. } => {
                        self.persist();
                        EventOutcome::PersistDiverged { seq }
                    }
                    Acknowledgement::Failed(_) => EventOutcome::PersistFailed { seq },
                }
            }
        }
    }

    fn commit(&mut self, record: MoveRecord) {
        self.state.position = record.resulting_position.clone();
        self.state.side_to_move = self.state.position.side_to_move();
        self.state.history.push(record);
        self.state.status = self.evaluate_status();
        self.notice = None;

        if self.state.status.is_terminal() {
            self.phase = SyncPhase::Terminal;
            info!(room = %self.state.room_key, status = ?self.state.status, "Game over");
        } else {
            self.phase = SyncPhase::Idle;
        }

        self.persist();
        self.ensure_opponent_request();
    }

    fn evaluate_status(&self) -> GameStatus {
        let status = GameStatus::from(self.ctx.rules.terminal_status(&self.state.position));
        if status == GameStatus::Ongoing && self.is_threefold_repetition() {
            return GameStatus::Draw {
                reason: chess_core::DrawReason::ThreefoldRepetition,
            };
        }
        status
    }

    fn is_threefold_repetition(&self) -> bool {
        let key = self.state.position.repetition_key();
        let occurrences = std::iter::once(&self.base_position)
            .chain(self.state.history.iter().map(|r| &r.resulting_position))
            .filter(|p| p.repetition_key() == key)
            .count();
        occurrences >= 3
    }

    fn seat_for_opponent(&self, players: Option<&PlayerAssignment>) -> Option<Side> {
        self.ctx.opponent.as_ref()?;
        match players {
            Some(players) => players.engine_side(),
            None => Some(self.ctx.config.opponent.side),
        }
    }

    fn ensure_opponent_request(&mut self) {
        if self.phase != SyncPhase::Terminal
            && self.opponent_side == Some(self.state.side_to_move)
            && self.in_flight.is_none()
        {
            self.schedule_opponent(1);
        }
    }

    fn schedule_opponent(&mut self, attempt: u32) {
        let Some(source) = self.ctx.opponent.clone() else {
            return;
        };
        self.cancel_opponent();

        self.next_ticket += 1;
        let ticket = OpponentTicket(self.next_ticket);
        let settings = self.ctx.config.opponent.clone();
        let position = self.state.position.clone();
        let events = self.events.clone();
        let delay = settings.backoff_for(attempt);

        debug!(room = %self.state.room_key, ticket = ticket.0, attempt, "Requesting opponent move");
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome =
                match tokio::time::timeout(settings.timeout, source.request_move(&position, settings.depth)).await {
                    Ok(result) => result,
                    Err(_) => Err(OpponentError::Timeout(settings.timeout)),
                };
            // The receiver is gone once the session ended
            let _ = events.send(SessionEvent::Opponent(OpponentReply {
                ticket,
                requested_for: position,
                attempt,
                outcome,
            }));
        });

        self.in_flight = Some(InFlight { ticket, handle });
        self.phase = SyncPhase::AwaitingOpponentMove;
    }

    fn retry_opponent(&mut self, attempt: u32, error: OpponentError) -> EventOutcome {
        let max_attempts = self.ctx.config.opponent.max_attempts;
        if attempt < max_attempts {
            warn!(room = %self.state.room_key, attempt, error = %error, "Opponent request failed, retrying");
            self.schedule_opponent(attempt + 1);
            return EventOutcome::OpponentRetrying {
                attempt: attempt + 1,
            };
        }

        warn!(room = %self.state.room_key, attempt, error = %error, "Opponent unavailable");
        self.phase = SyncPhase::Idle;
        let notice = SessionNotice::OpponentUnavailable {
            attempts: attempt,
            reason: error.to_string(),
        };
        self.notice = Some(notice.clone());
        EventOutcome::Notice(notice)
    }

    fn cancel_opponent(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            debug!(room = %self.state.room_key, ticket = in_flight.ticket.0, "Cancelling opponent request");
            in_flight.handle.abort();
        }
        if self.phase == SyncPhase::AwaitingOpponentMove {
            self.phase = SyncPhase::Idle;
        }
    }

    fn persist(&mut self) {
        let job = PersistJob {
            seq: self.persistence.issue(),
            record_id: self.persistence.record_id(),
            room_key: self.state.room_key.clone(),
            fen_description: self.state.position.as_fen().to_string(),
            players: self.players.clone(),
        };
        let store = Arc::clone(&self.ctx.store);
        let events = self.events.clone();

        debug!(room = %job.room_key, seq = job.seq, "Persisting session");
        tokio::spawn(async move {
            let result = job.run(store.as_ref()).await;
            let _ = events.send(SessionEvent::Persisted {
                seq: job.seq,
                result,
            });
        });
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
        }
    }
}
