use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A hero definition that passed validation but has not been stored yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Base model the hero is backed by until a hero-specific model exists
    pub model_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hero {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub system_prompt: Option<String>,
    pub model_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hero {
    pub fn definition(&self) -> HeroDefinition {
        HeroDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            system_prompt: self.system_prompt.clone(),
            model_name: self.model_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// One rejected field of a hero payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Body returned by a successful hero creation.
///
/// `warning` is only present when the hero was stored but its dedicated model
/// could not be created in the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateHeroResponse {
    #[serde(flatten)]
    pub hero: Hero,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }
}
