use std::sync::Arc;

use axum::{Extension, Json};
use serde_json::{json, Value as JsonValue};

use crate::rooms::RoomHub;

/// GET /health
pub async fn health_check(Extension(hub): Extension<Arc<RoomHub>>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "engine": hub.has_engine(),
        "rooms": hub.live_rooms().await,
    }))
}
