use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};

use session_sync::ENGINE_PLAYER_ID;

use crate::auth::jwt;
use crate::config::Config;
use crate::error::AppError;

/// Player authenticated by the bearer token in the Authorization header.
/// Use as an extractor in route handlers that require auth.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub player_id: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = parts
            .extensions
            .get::<Config>()
            .ok_or(AppError::Internal("Missing config".into()))?
            .clone();

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or(AppError::Unauthorized)?;

        let claims = jwt::verify_token(token, &config.jwt_secret)
            .ok_or(AppError::Unauthorized)?;

        if claims.sub.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }
        // The engine seat is never held by a token
        if claims.sub == ENGINE_PLAYER_ID {
            return Err(AppError::Forbidden("Reserved player id".into()));
        }

        Ok(AuthUser {
            player_id: claims.sub,
        })
    }
}
