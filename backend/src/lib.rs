pub mod auth;
pub mod config;
pub mod dbs;
mod handlers;
pub mod heroes;
pub mod ollama;

use crate::config::AppConfig;
use crate::dbs::{Database, DbError};
use crate::handlers::{
    create_conversation, create_hero, get_conversation, get_hero, get_me, list_admin_heroes,
    list_conversations, list_heroes, send_message,
};
use crate::heroes::{HeroProvisioning, ModelProvisioner};
use crate::ollama::{ModelRuntime, OllamaClient, RuntimeError};
use axum::{
    Router,
    routing::{get, post},
};
use shared::models::{Role, User};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Error, Debug)]
pub enum InitError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Model runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub runtime: Arc<dyn ModelRuntime>,
    pub provisioning: HeroProvisioning,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, runtime: Arc<dyn ModelRuntime>, config: &AppConfig) -> Self {
        let provisioner = ModelProvisioner::new(runtime.clone(), config.provisioning.clone());
        Self {
            provisioning: HeroProvisioning::new(db.clone(), provisioner),
            db,
            runtime,
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, InitError> {
        let db = dbs::connect(&config.database).await?;
        let runtime: Arc<dyn ModelRuntime> = Arc::new(OllamaClient::new(&config.runtime)?);
        tracing::info!("Using model runtime at {}", config.runtime.base_url);
        Ok(Self::new(db, runtime, config))
    }
}

/// Create or update a user and return it together with a fresh bearer token.
/// The token itself is never stored.
pub async fn issue_token(
    db: &dyn Database,
    email: String,
    name: Option<String>,
    role: Role,
) -> Result<(User, String), DbError> {
    let token = auth::generate_token();
    let user = db
        .upsert_user(email, name, role, auth::hash_token(&token))
        .await?;
    tracing::info!("Issued token for user {} ({})", user.id, user.role.as_str());
    Ok((user, token))
}

pub fn init(router: Router<AppState>, state: AppState) -> Router<()> {
    router
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/me", get(get_me))
        .route("/api/heroes", get(list_heroes))
        .route("/api/heroes/create", post(create_hero))
        .route("/api/heroes/{hero_id}", get(get_hero))
        .route("/api/admin/heroes", get(list_admin_heroes))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/{conversation_id}", get(get_conversation))
        .route("/api/messages", post(send_message))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
