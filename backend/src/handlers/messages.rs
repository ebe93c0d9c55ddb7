use crate::AppState;
use crate::auth::AuthUser;
use crate::dbs::DbError;
use crate::heroes::provision::effective_system_prompt;
use crate::ollama::ChatTurn;
use axum::{Json, extract::State, http::StatusCode};
use shared::models::{
    Hero, Message, ROLE_ASSISTANT, ROLE_SYSTEM, ROLE_USER, SendMessageRequest,
    SendMessageResponse,
};

pub const REPLY_WARNING: &str = "Message saved, but the hero could not reply";

/// The system turn followed by the stored history, oldest first.
fn chat_turns(hero: &Hero, system_prompt: String, history: &[Message]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(history.len() + 1);
    turns.push(ChatTurn {
        role: ROLE_SYSTEM.to_string(),
        content: system_prompt,
    });
    turns.extend(history.iter().map(|m| ChatTurn {
        role: m.role.clone(),
        content: m.content.clone(),
    }));
    tracing::debug!("Chatting with {} over {} turns", hero.model_name, turns.len());
    turns
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, StatusCode> {
    if payload.content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let conversation = match state
        .db
        .get_conversation(user.id, payload.conversation_id)
        .await
    {
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

    let message = state
        .db
        .append_message(conversation.id, ROLE_USER, payload.content)
        .await
        .map_err(|e| {
            tracing::error!("Failed to append message: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    let history = state.db.get_messages(conversation.id).await.map_err(|e| {
        tracing::error!("Failed to get messages: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let system_prompt = effective_system_prompt(
        hero.system_prompt.as_deref(),
        &hero.name,
        &hero.description,
        state.provisioning.config(),
    );
    let turns = chat_turns(&hero, system_prompt, &history);

    let content = match state.runtime.chat(&hero.model_name, &turns).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Hero {} did not reply: {}", hero.id, e);
            return Ok(Json(SendMessageResponse {
                message,
                reply: None,
                warning: Some(format!("{}: {}", REPLY_WARNING, e)),
            }));
        }
    };

    let reply = state
        .db
        .append_message(conversation.id, ROLE_ASSISTANT, content)
        .await
        .map_err(|e| {
            tracing::error!("Failed to store reply: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(SendMessageResponse {
        message,
        reply: Some(reply),
        warning: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(role: &str, content: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            conversation_id: Uuid::nil(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn system_turn_comes_first() {
        let hero = Hero {
            id: Uuid::nil(),
            name: "Einstein".to_string(),
            description: "physicist".to_string(),
            system_prompt: None,
            model_name: "hero-x".to_string(),
            avatar_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let history = [message(ROLE_USER, "hi"), message(ROLE_ASSISTANT, "hello")];

        let turns = chat_turns(&hero, "You are Einstein, physicist".to_string(), &history);

        let roles: Vec<_> = turns.iter().map(|t| t.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
        assert_eq!(turns[0].content, "You are Einstein, physicist");
        assert_eq!(turns[2].content, "hello");
    }
}
