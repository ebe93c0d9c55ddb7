use crate::AppState;
use crate::auth::AuthUser;
use crate::dbs::DbError;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use shared::models::{
    Conversation, ConversationDetail, ConversationSummary, CreateConversationRequest,
    default_conversation_title,
};
use uuid::Uuid;

pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let conversations = state.db.list_conversations(user.id).await.map_err(|e| {
        tracing::error!("Failed to list conversations: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(conversations))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), StatusCode> {
    let hero = match state.db.get_hero(payload.hero_id).await {
        Ok(hero) => hero,
        Err(DbError::NotFound(_)) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get hero for conversation: {:?}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let conversation = state
        .db
        .create_conversation(user.id, hero.id, default_conversation_title(&hero.name))
        .await
        .map_err(|e| {
            tracing::error!("Failed to create conversation: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationDetail>, StatusCode> {
    let conversation = match state.db.get_conversation(user.id, conversation_id).await {
        Ok(conversation) => conversation,
        Err(DbError::NotFound(_)) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get conversation: {:?}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let hero = state.db.get_hero(conversation.hero_id).await.map_err(|e| {
        tracing::error!("Failed to get hero for conversation: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let messages = state.db.get_messages(conversation.id).await.map_err(|e| {
        tracing::error!("Failed to get messages: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ConversationDetail {
        conversation,
        hero,
        messages,
    }))
}
