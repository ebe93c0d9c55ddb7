use crate::AppState;
use crate::auth::{AdminUser, AuthUser};
use crate::dbs::{DbError, HeroOrder};
use crate::heroes::{ProvisioningOutcome, Rejection};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use shared::models::{CreateHeroResponse, ErrorResponse, FieldError, Hero};
use uuid::Uuid;

const CREATED_MESSAGE: &str = "Hero created successfully with custom model";

fn invalid_input(errors: Vec<FieldError>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            message: "Invalid input".to_string(),
            errors,
        }),
    )
        .into_response()
}

/// The body is parsed here rather than by the `Json` extractor so that
/// malformed JSON and a missing content type get the same structured 400.
pub async fn create_hero(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Bytes,
) -> Response {
    tracing::debug!("Admin {} is creating a hero", admin.id);
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!("Unparseable hero payload: {}", e);
            return invalid_input(vec![FieldError::new("body", "Invalid JSON")]);
        }
    };
    match state.provisioning.create_hero(payload).await {
        ProvisioningOutcome::Completed { hero } => (
            StatusCode::CREATED,
            Json(CreateHeroResponse {
                hero,
                message: Some(CREATED_MESSAGE.to_string()),
                warning: None,
            }),
        )
            .into_response(),
        ProvisioningOutcome::Degraded { hero, warning } => (
            StatusCode::CREATED,
            Json(CreateHeroResponse {
                hero,
                message: None,
                warning: Some(warning),
            }),
        )
            .into_response(),
        ProvisioningOutcome::Rejected(Rejection::Validation(errors)) => invalid_input(errors.0),
        ProvisioningOutcome::Rejected(Rejection::Storage(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to create hero")),
        )
            .into_response(),
    }
}

pub async fn list_heroes(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<Hero>>, StatusCode> {
    let heroes = state.db.list_heroes(HeroOrder::NameAsc).await.map_err(|e| {
        tracing::error!("Failed to list heroes: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(heroes))
}

pub async fn list_admin_heroes(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<Hero>>, StatusCode> {
    let heroes = state
        .db
        .list_heroes(HeroOrder::NewestFirst)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list heroes: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(heroes))
}

pub async fn get_hero(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(hero_id): Path<Uuid>,
) -> Result<Json<Hero>, StatusCode> {
    match state.db.get_hero(hero_id).await {
        Ok(hero) => Ok(Json(hero)),
        Err(DbError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get hero: {:?}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
