use crate::dbs::{Database, DbError, DbResult, HeroOrder, now, touch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    Conversation, ConversationSummary, Hero, HeroDefinition, Message, Role, User,
};
use sqlx::{Pool, Postgres, Row, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

const HERO_COLUMNS: &str =
    "id, name, description, system_prompt, model_name, avatar_url, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresDatabase {
    pool: Pool<Postgres>,
}

impl PostgresDatabase {
    pub async fn new(database_url: &str) -> DbResult<Self> {
        let pool = PgPoolOptions::new().connect(database_url).await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> DbResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                role TEXT NOT NULL,
                token_hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // No uniqueness on model_name: two heroes may share a backing model.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS heroes (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                system_prompt TEXT,
                model_name TEXT NOT NULL,
                avatar_url TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                hero_id UUID NOT NULL,
                title TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id),
                FOREIGN KEY(hero_id) REFERENCES heroes(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id UUID PRIMARY KEY,
                conversation_id UUID NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                FOREIGN KEY(conversation_id) REFERENCES conversations(id)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn hero_from_row(row: &PgRow) -> Hero {
    Hero {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        system_prompt: row.get("system_prompt"),
        model_name: row.get("model_name"),
        avatar_url: row.get("avatar_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn user_from_row(row: &PgRow) -> DbResult<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        role: Role::parse(&role)
            .ok_or_else(|| DbError::Internal(format!("Unknown role {}", role)))?,
        created_at: row.get("created_at"),
    })
}

fn conversation_from_row(row: &PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        hero_id: row.get("hero_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &PgRow) -> Message {
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: row.get("role"),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn create_hero(&self, definition: HeroDefinition) -> DbResult<Hero> {
        let created_at = now();
        let hero = Hero {
            id: Uuid::now_v7(),
            name: definition.name,
            description: definition.description,
            system_prompt: definition.system_prompt,
            model_name: definition.model_name,
            avatar_url: definition.avatar_url,
            created_at,
            updated_at: created_at,
        };

        sqlx::query(
            "INSERT INTO heroes (id, name, description, system_prompt, model_name, avatar_url, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(hero.id)
        .bind(&hero.name)
        .bind(&hero.description)
        .bind(&hero.system_prompt)
        .bind(&hero.model_name)
        .bind(&hero.avatar_url)
        .bind(hero.created_at)
        .bind(hero.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(hero)
    }

    async fn update_hero_model_name(&self, hero_id: Uuid, model_name: String) -> DbResult<Hero> {
        let mut tx = self.pool.begin().await?;
        let previous: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT updated_at FROM heroes WHERE id = $1 FOR UPDATE")
                .bind(hero_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Err(DbError::NotFound(format!("Hero {} not found", hero_id)));
        };

        let row = sqlx::query(&format!(
            "UPDATE heroes SET model_name = $1, updated_at = $2 WHERE id = $3 RETURNING {}",
            HERO_COLUMNS
        ))
        .bind(model_name)
        .bind(touch(previous))
        .bind(hero_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(hero_from_row(&row))
    }

    async fn get_hero(&self, hero_id: Uuid) -> DbResult<Hero> {
        let row = sqlx::query(&format!("SELECT {} FROM heroes WHERE id = $1", HERO_COLUMNS))
            .bind(hero_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(hero_from_row(&row)),
            None => Err(DbError::NotFound(format!("Hero {} not found", hero_id))),
        }
    }

    async fn list_heroes(&self, order: HeroOrder) -> DbResult<Vec<Hero>> {
        let order_by = match order {
            HeroOrder::NameAsc => "name ASC",
            HeroOrder::NewestFirst => "created_at DESC, id DESC",
        };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM heroes ORDER BY {}",
            HERO_COLUMNS, order_by
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(hero_from_row).collect())
    }

    async fn upsert_user(
        &self,
        email: String,
        name: Option<String>,
        role: Role,
        token_hash: String,
    ) -> DbResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (id, email, name, role, token_hash, created_at) VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name, role = EXCLUDED.role, token_hash = EXCLUDED.token_hash
             RETURNING id, email, name, role, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .bind(token_hash)
        .bind(now())
        .fetch_one(&self.pool)
        .await?;
        user_from_row(&row)
    }

    async fn get_user_by_token_hash(&self, token_hash: &str) -> DbResult<User> {
        let row = sqlx::query(
            "SELECT id, email, name, role, created_at FROM users WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(DbError::NotFound("User for token not found".to_string())),
        }
    }

    async fn create_conversation(
        &self,
        user_id: Uuid,
        hero_id: Uuid,
        title: String,
    ) -> DbResult<Conversation> {
        let created_at = now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            user_id,
            hero_id,
            title,
            created_at,
            updated_at: created_at,
        };

        sqlx::query(
            "INSERT INTO conversations (id, user_id, hero_id, title, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(conversation.id)
        .bind(conversation.user_id)
        .bind(conversation.hero_id)
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn list_conversations(&self, user_id: Uuid) -> DbResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT c.id, c.user_id, c.hero_id, c.title, c.created_at, c.updated_at,
                    h.name AS hero_name, h.avatar_url AS hero_avatar_url,
                    (SELECT m.content FROM messages m WHERE m.conversation_id = c.id
                     ORDER BY m.created_at DESC LIMIT 1) AS last_message
             FROM conversations c JOIN heroes h ON h.id = c.hero_id
             WHERE c.user_id = $1
             ORDER BY c.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                conversation: conversation_from_row(row),
                hero_name: row.get("hero_name"),
                hero_avatar_url: row.get("hero_avatar_url"),
                last_message: row.get("last_message"),
            })
            .collect())
    }

    async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> DbResult<Conversation> {
        let row = sqlx::query(
            "SELECT id, user_id, hero_id, title, created_at, updated_at FROM conversations WHERE id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(conversation_from_row(&row)),
            None => Err(DbError::NotFound(format!(
                "Conversation {} not found",
                conversation_id
            ))),
        }
    }

    async fn get_messages(&self, conversation_id: Uuid) -> DbResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: String,
    ) -> DbResult<Message> {
        let mut tx = self.pool.begin().await?;
        let previous: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT updated_at FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Err(DbError::NotFound(format!(
                "Conversation {} not found",
                conversation_id
            )));
        };

        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?;
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            role: role.to_string(),
            content,
            created_at: latest.map(touch).unwrap_or_else(now),
        };

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(touch(previous))
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }
}
