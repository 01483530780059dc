use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use session_sync::{SessionError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Session(e) => match e {
                SessionError::IllegalMove(_) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
                SessionError::GameOver
                | SessionError::EmptyHistory
                | SessionError::OpponentToMove
                | SessionError::NotOpponentTurn
                | SessionError::PlayersAlreadyAssigned => (StatusCode::CONFLICT, e.to_string()),
                SessionError::Persistence(inner) => {
                    tracing::error!("Session persistence error: {inner}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
                }
            },
            AppError::Store(e) => {
                tracing::error!("Store error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}
