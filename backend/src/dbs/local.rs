//! SQLite-backed store for single-machine deployments.
//!
//! Timestamps are kept as integer microseconds since the epoch so that
//! `ORDER BY` on them is chronological.

use crate::dbs::{Database, DbError, DbResult, HeroOrder, now, touch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    Conversation, ConversationSummary, Hero, HeroDefinition, Message, Role, User,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

const HERO_COLUMNS: &str =
    "id, name, description, system_prompt, model_name, avatar_url, created_at, updated_at";

#[derive(Clone)]
pub struct LocalDatabase {
    pool: Pool<Sqlite>,
}

impl LocalDatabase {
    pub async fn new(database_url: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> DbResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id BLOB PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                role TEXT NOT NULL,
                token_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS heroes (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                system_prompt TEXT,
                model_name TEXT NOT NULL,
                avatar_url TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id BLOB PRIMARY KEY,
                user_id BLOB NOT NULL,
                hero_id BLOB NOT NULL,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id),
                FOREIGN KEY(hero_id) REFERENCES heroes(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id BLOB PRIMARY KEY,
                conversation_id BLOB NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY(conversation_id) REFERENCES conversations(id)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| DbError::Internal(format!("Timestamp {} out of range", micros)))
}

fn hero_from_row(row: &SqliteRow) -> DbResult<Hero> {
    Ok(Hero {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        system_prompt: row.get("system_prompt"),
        model_name: row.get("model_name"),
        avatar_url: row.get("avatar_url"),
        created_at: from_micros(row.get("created_at"))?,
        updated_at: from_micros(row.get("updated_at"))?,
    })
}

fn user_from_row(row: &SqliteRow) -> DbResult<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        role: Role::parse(&role)
            .ok_or_else(|| DbError::Internal(format!("Unknown role {}", role)))?,
        created_at: from_micros(row.get("created_at"))?,
    })
}

fn conversation_from_row(row: &SqliteRow) -> DbResult<Conversation> {
    Ok(Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        hero_id: row.get("hero_id"),
        title: row.get("title"),
        created_at: from_micros(row.get("created_at"))?,
        updated_at: from_micros(row.get("updated_at"))?,
    })
}

fn message_from_row(row: &SqliteRow) -> DbResult<Message> {
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: row.get("role"),
        content: row.get("content"),
        created_at: from_micros(row.get("created_at"))?,
    })
}

#[async_trait]
impl Database for LocalDatabase {
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
            "INSERT INTO heroes (id, name, description, system_prompt, model_name, avatar_url, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(hero.id)
        .bind(&hero.name)
        .bind(&hero.description)
        .bind(&hero.system_prompt)
        .bind(&hero.model_name)
        .bind(&hero.avatar_url)
        .bind(to_micros(hero.created_at))
        .bind(to_micros(hero.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(hero)
    }

    async fn update_hero_model_name(&self, hero_id: Uuid, model_name: String) -> DbResult<Hero> {
        let mut tx = self.pool.begin().await?;
        let previous: Option<i64> = sqlx::query_scalar("SELECT updated_at FROM heroes WHERE id = ?")
            .bind(hero_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(previous) = previous else {
            return Err(DbError::NotFound(format!("Hero {} not found", hero_id)));
        };

        let row = sqlx::query(&format!(
            "UPDATE heroes SET model_name = ?, updated_at = ? WHERE id = ? RETURNING {}",
            HERO_COLUMNS
        ))
        .bind(model_name)
        .bind(to_micros(touch(from_micros(previous)?)))
        .bind(hero_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        hero_from_row(&row)
    }

    async fn get_hero(&self, hero_id: Uuid) -> DbResult<Hero> {
        let row = sqlx::query(&format!("SELECT {} FROM heroes WHERE id = ?", HERO_COLUMNS))
            .bind(hero_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => hero_from_row(&row),
            None => Err(DbError::NotFound(format!("Hero {} not found", hero_id))),
        }
    }

    async fn list_heroes(&self, order: HeroOrder) -> DbResult<Vec<Hero>> {
        let order_by = match order {
            HeroOrder::NameAsc => "name ASC",
            HeroOrder::NewestFirst => "created_at DESC, rowid DESC",
        };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM heroes ORDER BY {}",
            HERO_COLUMNS, order_by
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hero_from_row).collect()
    }

    async fn upsert_user(
        &self,
        email: String,
        name: Option<String>,
        role: Role,
        token_hash: String,
    ) -> DbResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (id, email, name, role, token_hash, created_at) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (email) DO UPDATE SET name = excluded.name, role = excluded.role, token_hash = excluded.token_hash
             RETURNING id, email, name, role, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .bind(token_hash)
        .bind(to_micros(now()))
        .fetch_one(&self.pool)
        .await?;
        user_from_row(&row)
    }

    async fn get_user_by_token_hash(&self, token_hash: &str) -> DbResult<User> {
        let row =
            sqlx::query("SELECT id, email, name, role, created_at FROM users WHERE token_hash = ?")
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
            "INSERT INTO conversations (id, user_id, hero_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation.id)
        .bind(conversation.user_id)
        .bind(conversation.hero_id)
        .bind(&conversation.title)
        .bind(to_micros(conversation.created_at))
        .bind(to_micros(conversation.updated_at))
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
             WHERE c.user_id = ?
             ORDER BY c.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ConversationSummary {
                    conversation: conversation_from_row(row)?,
                    hero_name: row.get("hero_name"),
                    hero_avatar_url: row.get("hero_avatar_url"),
                    last_message: row.get("last_message"),
                })
            })
            .collect()
    }

    async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> DbResult<Conversation> {
        let row = sqlx::query(
            "SELECT id, user_id, hero_id, title, created_at, updated_at FROM conversations WHERE id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => conversation_from_row(&row),
            None => Err(DbError::NotFound(format!(
                "Conversation {} not found",
                conversation_id
            ))),
        }
    }

    async fn get_messages(&self, conversation_id: Uuid) -> DbResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at FROM messages WHERE conversation_id = ? ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: String,
    ) -> DbResult<Message> {
        let mut tx = self.pool.begin().await?;
        let previous: Option<i64> =
            sqlx::query_scalar("SELECT updated_at FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Err(DbError::NotFound(format!(
                "Conversation {} not found",
                conversation_id
            )));
        };

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?;
        let created_at = match latest {
            Some(latest) => touch(from_micros(latest)?),
            None => now(),
        };
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            role: role.to_string(),
            content,
            created_at,
        };

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(to_micros(message.created_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(to_micros(touch(from_micros(previous)?)))
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ROLE_ASSISTANT, ROLE_USER};

    async fn open() -> LocalDatabase {
        LocalDatabase::new("sqlite::memory:").await.unwrap()
    }

    fn definition(name: &str) -> HeroDefinition {
        HeroDefinition {
            name: name.to_string(),
            description: "physicist".to_string(),
            system_prompt: None,
            model_name: "llama3.2:latest".to_string(),
            avatar_url: Some(String::new()),
        }
    }

    #[tokio::test]
    async fn hero_round_trips_through_sqlite() {
        let db = open().await;
        let input = definition("Einstein");

        let created = db.create_hero(input.clone()).await.unwrap();
        let read = db.get_hero(created.id).await.unwrap();

        assert_eq!(read, created);
        assert_eq!(read.definition(), input);
        assert_eq!(read.created_at, read.updated_at);
    }

    #[tokio::test]
    async fn update_model_name_refreshes_updated_at() {
        let db = open().await;
        let hero = db.create_hero(definition("Curie")).await.unwrap();

        let updated = db
            .update_hero_model_name(hero.id, format!("hero-{}", hero.id))
            .await
            .unwrap();

        assert_eq!(updated.model_name, format!("hero-{}", hero.id));
        assert!(updated.updated_at > updated.created_at);
        assert_eq!(db.get_hero(hero.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn update_unknown_hero_is_not_found() {
        let db = open().await;
        let result = db
            .update_hero_model_name(Uuid::now_v7(), "hero-x".to_string())
            .await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn heroes_list_by_name() {
        let db = open().await;
        db.create_hero(definition("Tesla")).await.unwrap();
        db.create_hero(definition("Ada")).await.unwrap();

        let names: Vec<_> = db
            .list_heroes(HeroOrder::NameAsc)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, ["Ada", "Tesla"]);

        let newest = db.list_heroes(HeroOrder::NewestFirst).await.unwrap();
        assert_eq!(newest[0].name, "Ada");
    }

    #[tokio::test]
    async fn user_lookup_by_token_hash() {
        let db = open().await;
        let user = db
            .upsert_user("admin@example.com".into(), Some("Admin".into()), Role::Admin, "h1".into())
            .await
            .unwrap();
        let again = db
            .upsert_user("admin@example.com".into(), Some("Admin".into()), Role::Admin, "h2".into())
            .await
            .unwrap();

        assert_eq!(user.id, again.id);
        assert!(matches!(
            db.get_user_by_token_hash("h1").await,
            Err(DbError::NotFound(_))
        ));
        assert_eq!(db.get_user_by_token_hash("h2").await.unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn conversation_history_is_ordered() {
        let db = open().await;
        let user = db
            .upsert_user("u@example.com".into(), None, Role::User, "t".into())
            .await
            .unwrap();
        let hero = db.create_hero(definition("Einstein")).await.unwrap();
        let conversation = db
            .create_conversation(user.id, hero.id, "Conversation with Einstein".into())
            .await
            .unwrap();

        for (role, content) in [(ROLE_USER, "one"), (ROLE_ASSISTANT, "two"), (ROLE_USER, "three")] {
            db.append_message(conversation.id, role, content.into())
                .await
                .unwrap();
        }

        let contents: Vec<_> = db
            .get_messages(conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["one", "two", "three"]);

        let summaries = db.list_conversations(user.id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].last_message.as_deref(), Some("three"));
        assert!(summaries[0].conversation.updated_at > conversation.updated_at);

        let fetched = db.get_conversation(user.id, conversation.id).await.unwrap();
        assert_eq!(fetched.title, "Conversation with Einstein");
        assert!(db.get_conversation(Uuid::now_v7(), conversation.id).await.is_err());
    }
}
