pub mod auth;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod rooms;
pub mod routes;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::rooms::RoomHub;

/// Build the HTTP router over a room hub.
pub fn app(hub: Arc<RoomHub>, config: Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        // Rooms
        .route("/api/rooms", post(routes::rooms::open_room))
        .route(
            "/api/rooms/{room_key}",
            get(routes::rooms::get_room).delete(routes::rooms::close_room),
        )
        .route("/api/rooms/{room_key}/moves", post(routes::rooms::submit_move))
        .route("/api/rooms/{room_key}/undo", post(routes::rooms::undo_move))
        .route("/api/rooms/{room_key}/reset", post(routes::rooms::reset_room))
        .route("/api/rooms/{room_key}/resign", post(routes::rooms::resign))
        .route("/api/rooms/{room_key}/opponent", post(routes::rooms::request_opponent))
        .route("/api/rooms/{room_key}/targets", get(routes::rooms::legal_targets))
        .route("/api/rooms/{room_key}/arrows", post(routes::rooms::resolve_arrows))
        // Shared state
        .layer(Extension(hub))
        .layer(Extension(config))
        .layer(cors)
}
