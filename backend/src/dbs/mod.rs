use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::models::{
    Conversation, ConversationSummary, Hero, HeroDefinition, Message, Role, User,
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod local;
pub mod memory;
pub mod postgres;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseConfig {
    Memory,
    Local { url: String },
    Postgres { url: String },
}

impl DatabaseConfig {
    /// Pick a backend from a connection string: `memory`, `sqlite:...` or
    /// `postgres://...`.
    pub fn from_url(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.eq_ignore_ascii_case("memory") {
            Some(Self::Memory)
        } else if url.starts_with("sqlite:") {
            Some(Self::Local {
                url: url.to_string(),
            })
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::Postgres {
                url: url.to_string(),
            })
        } else {
            None
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeroOrder {
    /// Alphabetical, for people picking a hero to talk to
    NameAsc,
    /// Most recently created first, for the admin console
    NewestFirst,
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn create_hero(&self, definition: HeroDefinition) -> DbResult<Hero>;
    async fn update_hero_model_name(&self, hero_id: Uuid, model_name: String) -> DbResult<Hero>;
    async fn get_hero(&self, hero_id: Uuid) -> DbResult<Hero>;
    async fn list_heroes(&self, order: HeroOrder) -> DbResult<Vec<Hero>>;

    async fn upsert_user(
        &self,
        email: String,
        name: Option<String>,
        role: Role,
        token_hash: String,
    ) -> DbResult<User>;
    async fn get_user_by_token_hash(&self, token_hash: &str) -> DbResult<User>;

    async fn create_conversation(
        &self,
        user_id: Uuid,
        hero_id: Uuid,
        title: String,
    ) -> DbResult<Conversation>;
    async fn list_conversations(&self, user_id: Uuid) -> DbResult<Vec<ConversationSummary>>;
    /// Only returns conversations owned by `user_id`.
    async fn get_conversation(&self, user_id: Uuid, conversation_id: Uuid)
    -> DbResult<Conversation>;
    async fn get_messages(&self, conversation_id: Uuid) -> DbResult<Vec<Message>>;
    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: String,
    ) -> DbResult<Message>;
}

pub async fn connect(config: &DatabaseConfig) -> DbResult<Arc<dyn Database>> {
    let db: Arc<dyn Database> = match config {
        DatabaseConfig::Memory => Arc::new(memory::MemoryDatabase::new()),
        DatabaseConfig::Local { url } => Arc::new(local::LocalDatabase::new(url).await?),
        DatabaseConfig::Postgres { url } => Arc::new(postgres::PostgresDatabase::new(url).await?),
    };
    Ok(db)
}

/// Timestamp for a row mutation. Always later than `previous`, even when the
/// clock has not moved past it at storage precision.
pub(crate) fn touch(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Current time truncated to microseconds, the precision both SQL backends keep.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}
