//! Bearer-token authentication.
//!
//! Tokens are handed out once (see the launcher's `create-user` command); the
//! store only ever sees their SHA-256 digest.

use crate::AppState;
use crate::dbs::DbError;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use shared::models::{ErrorResponse, Role, User};
use uuid::Uuid;

pub type AuthRejection = (StatusCode, Json<ErrorResponse>);

pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn unauthorized() -> AuthRejection {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Unauthorized")),
    )
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Any signed-in user.
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(unauthorized)?;
        match state.db.get_user_by_token_hash(&hash_token(token)).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(DbError::NotFound(_)) => Err(unauthorized()),
            Err(e) => {
                tracing::error!("Failed to look up user: {:?}", e);
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("Internal server error")),
                ))
            }
        }
    }
}

/// A signed-in user with the admin role. Everyone else gets 401.
#[derive(Clone, Debug)]
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            tracing::warn!("User {} is not an admin", user.id);
            return Err(unauthorized());
        }
        Ok(AdminUser(user))
    }
}
