//! In-memory store for development and tests.

use crate::dbs::{Database, DbError, DbResult, HeroOrder, now, touch};
use async_trait::async_trait;
use shared::models::{
    Conversation, ConversationSummary, Hero, HeroDefinition, Message, Role, User,
};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    heroes: Vec<Hero>,
    users: Vec<(User, String)>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
    hero_writes: AtomicUsize,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful hero inserts and updates so far.
    pub fn hero_writes(&self) -> usize {
        self.hero_writes.load(Ordering::SeqCst)
    }

    fn read(&self) -> DbResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| DbError::Internal(e.to_string()))
    }

    fn write(&self) -> DbResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| DbError::Internal(e.to_string()))
    }
}

#[async_trait]
impl Database for MemoryDatabase {
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
        self.write()?.heroes.push(hero.clone());
        self.hero_writes.fetch_add(1, Ordering::SeqCst);
        Ok(hero)
    }

    async fn update_hero_model_name(&self, hero_id: Uuid, model_name: String) -> DbResult<Hero> {
        let mut db = self.write()?;
        let hero = db
            .heroes
            .iter_mut()
            .find(|h| h.id == hero_id)
            .ok_or_else(|| DbError::NotFound(format!("Hero {} not found", hero_id)))?;
        hero.model_name = model_name;
        hero.updated_at = touch(hero.updated_at);
        let hero = hero.clone();
        self.hero_writes.fetch_add(1, Ordering::SeqCst);
        Ok(hero)
    }

    async fn get_hero(&self, hero_id: Uuid) -> DbResult<Hero> {
        self.read()?
            .heroes
            .iter()
            .find(|h| h.id == hero_id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("Hero {} not found", hero_id)))
    }

    async fn list_heroes(&self, order: HeroOrder) -> DbResult<Vec<Hero>> {
        let mut heroes = self.read()?.heroes.clone();
        match order {
            HeroOrder::NameAsc => heroes.sort_by(|a, b| a.name.cmp(&b.name)),
            HeroOrder::NewestFirst => heroes.reverse(),
        }
        Ok(heroes)
    }

    async fn upsert_user(
        &self,
        email: String,
        name: Option<String>,
        role: Role,
        token_hash: String,
    ) -> DbResult<User> {
        let mut db = self.write()?;
        if let Some((user, hash)) = db.users.iter_mut().find(|(u, _)| u.email == email) {
            user.name = name;
            user.role = role;
            *hash = token_hash;
            return Ok(user.clone());
        }

        let user = User {
            id: Uuid::now_v7(),
            email,
            name,
            role,
            created_at: now(),
        };
        db.users.push((user.clone(), token_hash));
        Ok(user)
    }

    async fn get_user_by_token_hash(&self, token_hash: &str) -> DbResult<User> {
        self.read()?
            .users
            .iter()
            .find(|(_, hash)| hash == token_hash)
            .map(|(user, _)| user.clone())
            .ok_or_else(|| DbError::NotFound("User for token not found".to_string()))
    }

    async fn create_conversation(
        &self,
        user_id: Uuid,
        hero_id: Uuid,
        title: String,
    ) -> DbResult<Conversation> {
        let mut db = self.write()?;
        if !db.heroes.iter().any(|h| h.id == hero_id) {
            return Err(DbError::NotFound(format!("Hero {} not found", hero_id)));
        }
        let created_at = now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            user_id,
            hero_id,
            title,
            created_at,
            updated_at: created_at,
        };
        db.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn list_conversations(&self, user_id: Uuid) -> DbResult<Vec<ConversationSummary>> {
        let db = self.read()?;
        let mut summaries: Vec<ConversationSummary> = db
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .filter_map(|c| {
                let hero = db.heroes.iter().find(|h| h.id == c.hero_id)?;
                let last_message = db
                    .messages
                    .iter()
                    .filter(|m| m.conversation_id == c.id)
                    .max_by_key(|m| m.created_at)
                    .map(|m| m.content.clone());
                Some(ConversationSummary {
                    conversation: c.clone(),
                    hero_name: hero.name.clone(),
                    hero_avatar_url: hero.avatar_url.clone(),
                    last_message,
                })
            })
            .collect();
        summaries.sort_by(|a, b| b.conversation.updated_at.cmp(&a.conversation.updated_at));
        Ok(summaries)
    }

    async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> DbResult<Conversation> {
        self.read()?
            .conversations
            .iter()
            .find(|c| c.id == conversation_id && c.user_id == user_id)
            .cloned()
            .ok_or_else(|| {
                DbError::NotFound(format!("Conversation {} not found", conversation_id))
            })
    }

    async fn get_messages(&self, conversation_id: Uuid) -> DbResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .read()?
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: String,
    ) -> DbResult<Message> {
        let mut db = self.write()?;
        let conversation = db
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| {
                DbError::NotFound(format!("Conversation {} not found", conversation_id))
            })?;
        conversation.updated_at = touch(conversation.updated_at);

        // Keep history strictly ordered even when two appends share a clock tick.
        let created_at = db
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.created_at)
            .max()
            .map(touch)
            .unwrap_or_else(now);
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            role: role.to_string(),
            content,
            created_at,
        };
        db.messages.push(message.clone());
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ROLE_ASSISTANT, ROLE_USER};

    fn definition(name: &str) -> HeroDefinition {
        HeroDefinition {
            name: name.to_string(),
            description: "physicist".to_string(),
            system_prompt: Some(String::new()),
            model_name: "llama3.2:latest".to_string(),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn create_then_read_returns_input_fields() {
        let db = MemoryDatabase::new();
        let input = definition("Einstein");

        let created = db.create_hero(input.clone()).await.unwrap();
        let read = db.get_hero(created.id).await.unwrap();

        assert_eq!(read.definition(), input);
        assert_eq!(read.created_at, read.updated_at);
        assert_eq!(db.hero_writes(), 1);
    }

    #[tokio::test]
    async fn update_model_name_advances_updated_at() {
        let db = MemoryDatabase::new();
        let hero = db.create_hero(definition("Curie")).await.unwrap();

        let updated = db
            .update_hero_model_name(hero.id, "hero-x".to_string())
            .await
            .unwrap();

        assert_eq!(updated.model_name, "hero-x");
        assert!(updated.updated_at > hero.updated_at);
        assert_eq!(updated.created_at, hero.created_at);
        assert_eq!(db.hero_writes(), 2);
    }

    #[tokio::test]
    async fn update_missing_hero_is_not_found() {
        let db = MemoryDatabase::new();
        let err = db
            .update_hero_model_name(Uuid::now_v7(), "hero-x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
        assert_eq!(db.hero_writes(), 0);
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_ids() {
        let db = std::sync::Arc::new(MemoryDatabase::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let db = db.clone();
                tokio::spawn(async move { db.create_hero(definition(&format!("h{i}"))).await })
            })
            .collect();

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap().id);
        }
        assert_eq!(ids.len(), 16);
    }

    #[tokio::test]
    async fn list_heroes_orders() {
        let db = MemoryDatabase::new();
        db.create_hero(definition("Tesla")).await.unwrap();
        db.create_hero(definition("Ada")).await.unwrap();

        let by_name: Vec<_> = db
            .list_heroes(HeroOrder::NameAsc)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(by_name, ["Ada", "Tesla"]);

        let newest: Vec<_> = db
            .list_heroes(HeroOrder::NewestFirst)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(newest, ["Ada", "Tesla"]);
    }

    #[tokio::test]
    async fn upsert_user_replaces_token() {
        let db = MemoryDatabase::new();
        let first = db
            .upsert_user("a@b.c".into(), None, Role::User, "old".into())
            .await
            .unwrap();
        let second = db
            .upsert_user("a@b.c".into(), Some("Admin".into()), Role::Admin, "new".into())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.role, Role::Admin);
        assert!(db.get_user_by_token_hash("old").await.is_err());
        assert_eq!(db.get_user_by_token_hash("new").await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn conversations_are_scoped_and_track_last_message() {
        let db = MemoryDatabase::new();
        let hero = db.create_hero(definition("Einstein")).await.unwrap();
        let owner = Uuid::now_v7();
        let conversation = db
            .create_conversation(owner, hero.id, "Conversation with Einstein".into())
            .await
            .unwrap();

        db.append_message(conversation.id, ROLE_USER, "hi".into())
            .await
            .unwrap();
        db.append_message(conversation.id, ROLE_ASSISTANT, "hello".into())
            .await
            .unwrap();

        let summaries = db.list_conversations(owner).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].last_message.as_deref(), Some("hello"));
        assert_eq!(summaries[0].hero_name, "Einstein");
        assert!(summaries[0].conversation.updated_at > conversation.updated_at);

        let history: Vec<_> = db
            .get_messages(conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(history, ["hi", "hello"]);

        let stranger = Uuid::now_v7();
        assert!(db.list_conversations(stranger).await.unwrap().is_empty());
        assert!(matches!(
            db.get_conversation(stranger, conversation.id).await,
            Err(DbError::NotFound(_))
        ));
    }
}
