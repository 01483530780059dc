use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use chess_core::{ArrowHint, Promotion, Side};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use session_sync::{PlayerAssignment, RoomKey, SessionError, ENGINE_PLAYER_ID};

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::rooms::{seats_of, RoomHub};

#[derive(Deserialize)]
pub struct OpenRoomRequest {
    /// Absent means a game against the engine
    pub opponent_id: Option<String>,
    /// Colour the caller wants; only honoured for a new game
    pub color: Option<String>,
}

#[derive(Deserialize)]
pub struct MoveBody {
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
}

#[derive(Deserialize)]
pub struct UndoQuery {
    /// Take back the caller's whole turn, including the opponent's reply
    #[serde(default)]
    pub turn: bool,
}

#[derive(Deserialize)]
pub struct TargetsQuery {
    pub square: String,
}

fn room_key(raw: &str) -> Result<RoomKey, AppError> {
    RoomKey::new(raw).map_err(AppError::BadRequest)
}

/// POST /api/rooms
pub async fn open_room(
    Extension(hub): Extension<Arc<RoomHub>>,
    user: AuthUser,
    Json(body): Json<OpenRoomRequest>,
) -> Result<(StatusCode, Json<JsonValue>), AppError> {
    let opponent_id = body
        .opponent_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| ENGINE_PLAYER_ID.to_string());

    if opponent_id == user.player_id {
        return Err(AppError::BadRequest("Cannot open a room against yourself".into()));
    }
    if opponent_id == ENGINE_PLAYER_ID && !hub.has_engine() {
        return Err(AppError::BadRequest("No engine opponent is configured".into()));
    }

    let side: Side = match body.color.as_deref() {
        Some(color) => color
            .parse()
            .map_err(|_| AppError::BadRequest(format!("Invalid color '{color}'")))?,
        None => Side::White,
    };

    let key = RoomKey::for_players(&user.player_id, &opponent_id).map_err(AppError::BadRequest)?;
    let players = match side {
        Side::White => PlayerAssignment::new(user.player_id.clone(), opponent_id),
        Side::Black => PlayerAssignment::new(opponent_id, user.player_id.clone()),
    };

    let snapshot = hub.open(key, players).await?;
    let seats = snapshot
        .players
        .as_ref()
        .map(|p| p.sides_of(&user.player_id))
        .unwrap_or_default();
    if seats.is_empty() {
        return Err(AppError::Forbidden("Not a participant in this room".into()));
    }

    tracing::info!(player = %user.player_id, room = %snapshot.state.room_key, "Room opened");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "room_key": snapshot.state.room_key,
            "your_sides": seats,
            "session": snapshot,
        })),
    ))
}

/// GET /api/rooms/{room_key}
pub async fn get_room(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    user: AuthUser,
) -> Result<Json<JsonValue>, AppError> {
    let key = room_key(&raw_key)?;
    let snapshot = hub
        .call(&key, move |sync| {
            seats_of(sync, &user.player_id)?;
            Ok(sync.snapshot())
        })
        .await?;
    Ok(Json(json!(snapshot)))
}

/// POST /api/rooms/{room_key}/moves
pub async fn submit_move(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    user: AuthUser,
    Json(body): Json<MoveBody>,
) -> Result<Json<JsonValue>, AppError> {
    let key = room_key(&raw_key)?;
    let promotion: Option<Promotion> = body
        .promotion
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(str::parse)
        .transpose()
        .map_err(SessionError::from)?;

    let (record, snapshot) = hub
        .call(&key, move |sync| {
            let seats = seats_of(sync, &user.player_id)?;
            let to_move = sync.state().side_to_move;
            if sync.opponent_side() != Some(to_move) && !seats.contains(&to_move) {
                return Err(AppError::Forbidden(format!("It is {to_move}'s move")));
            }
            let record = sync.submit_move(&body.from, &body.to, promotion)?;
            Ok((record, sync.snapshot()))
        })
        .await?;

    Ok(Json(json!({
        "move": record,
        "session": snapshot,
    })))
}

/// POST /api/rooms/{room_key}/undo?turn=true
pub async fn undo_move(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    Query(q): Query<UndoQuery>,
    user: AuthUser,
) -> Result<Json<JsonValue>, AppError> {
    let key = room_key(&raw_key)?;
    let snapshot = hub
        .call(&key, move |sync| {
            seats_of(sync, &user.player_id)?;
            if q.turn {
                sync.undo_turn()?;
            } else {
                sync.undo_last()?;
            }
            Ok(sync.snapshot())
        })
        .await?;
    Ok(Json(json!(snapshot)))
}

/// POST /api/rooms/{room_key}/reset
pub async fn reset_room(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    user: AuthUser,
) -> Result<Json<JsonValue>, AppError> {
    let key = room_key(&raw_key)?;
    let snapshot = hub
        .call(&key, move |sync| {
            seats_of(sync, &user.player_id)?;
            sync.reset_session();
            Ok(sync.snapshot())
        })
        .await?;
    Ok(Json(json!(snapshot)))
}

/// POST /api/rooms/{room_key}/resign
pub async fn resign(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    user: AuthUser,
) -> Result<Json<JsonValue>, AppError> {
    let key = room_key(&raw_key)?;
    let snapshot = hub
        .call(&key, move |sync| {
            let seats = seats_of(sync, &user.player_id)?;
            // A player holding both seats resigns for the side to move
            let side = if seats.len() == 1 {
                seats[0]
            } else {
                sync.state().side_to_move
            };
            sync.resign(side)?;
            Ok(sync.snapshot())
        })
        .await?;
    Ok(Json(json!(snapshot)))
}

/// POST /api/rooms/{room_key}/opponent
pub async fn request_opponent(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    user: AuthUser,
) -> Result<(StatusCode, Json<JsonValue>), AppError> {
    let key = room_key(&raw_key)?;
    let snapshot = hub
        .call(&key, move |sync| {
            seats_of(sync, &user.player_id)?;
            sync.request_opponent_move()?;
            Ok(sync.snapshot())
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!(snapshot))))
}

/// GET /api/rooms/{room_key}/targets?square=e2
pub async fn legal_targets(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    Query(q): Query<TargetsQuery>,
    user: AuthUser,
) -> Result<Json<JsonValue>, AppError> {
    let key = room_key(&raw_key)?;
    let square = q.square.clone();
    let targets = hub
        .call(&key, move |sync| {
            seats_of(sync, &user.player_id)?;
            Ok(sync.legal_targets(&square)?)
        })
        .await?;
    Ok(Json(json!({
        "square": q.square,
        "targets": targets,
    })))
}

/// POST /api/rooms/{room_key}/arrows
pub async fn resolve_arrows(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    user: AuthUser,
    Json(hints): Json<Vec<ArrowHint>>,
) -> Result<Json<JsonValue>, AppError> {
    let key = room_key(&raw_key)?;
    let arrows = hub
        .call(&key, move |sync| {
            seats_of(sync, &user.player_id)?;
            Ok(sync.arrows(&hints))
        })
        .await?;
    Ok(Json(json!({ "arrows": arrows })))
}

/// DELETE /api/rooms/{room_key}
pub async fn close_room(
    Extension(hub): Extension<Arc<RoomHub>>,
    Path(raw_key): Path<String>,
    user: AuthUser,
) -> Result<StatusCode, AppError> {
    let key = room_key(&raw_key)?;
    hub.call(&key, move |sync| seats_of(sync, &user.player_id).map(|_| ()))
        .await?;
    hub.close(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
