//! Hero creation: validate, store, provision the runtime model, reconcile.
//!
//! The database write and the runtime call are separate effects. If the
//! runtime call fails the hero stays stored with its base model and the
//! outcome is [`ProvisioningOutcome::Degraded`]; nothing is rolled back.

use crate::config::ProvisionerConfig;
use crate::dbs::{Database, DbError};
use crate::heroes::provision::{ModelProvisioner, ProvisionError, ProvisionedModel};
use crate::heroes::validate::{ValidationErrors, validate};
use serde_json::Value;
use shared::models::{Hero, HeroDefinition};
use std::sync::Arc;
use thiserror::Error;

pub const DEGRADED_WARNING: &str =
    "Hero created in database, but failed to create custom model in the runtime";

#[derive(Debug)]
enum State {
    Validating(Value),
    Persisting(HeroDefinition),
    Provisioning(Hero),
    Reconciling(Hero, Result<ProvisionedModel, ProvisionError>),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Validating(_) => "validating",
            State::Persisting(_) => "persisting",
            State::Provisioning(_) => "provisioning",
            State::Reconciling(..) => "reconciling",
        }
    }
}

#[derive(Error, Debug)]
pub enum Rejection {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("Failed to store hero: {0}")]
    Storage(#[from] DbError),
}

#[derive(Debug)]
pub enum ProvisioningOutcome {
    /// Stored and backed by its own runtime model.
    Completed { hero: Hero },
    /// Stored with the caller's base model; the runtime model is missing.
    Degraded { hero: Hero, warning: String },
    Rejected(Rejection),
}

impl ProvisioningOutcome {
    pub fn hero(&self) -> Option<&Hero> {
        match self {
            ProvisioningOutcome::Completed { hero } | ProvisioningOutcome::Degraded { hero, .. } => {
                Some(hero)
            }
            ProvisioningOutcome::Rejected(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct HeroProvisioning {
    db: Arc<dyn Database>,
    provisioner: ModelProvisioner,
}

impl HeroProvisioning {
    pub fn new(db: Arc<dyn Database>, provisioner: ModelProvisioner) -> Self {
        Self { db, provisioner }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        self.provisioner.config()
    }

    pub async fn create_hero(&self, raw: Value) -> ProvisioningOutcome {
        let mut state = State::Validating(raw);
        loop {
            tracing::debug!("Hero provisioning: {}", state.name());
            state = match state {
                State::Validating(raw) => match validate(&raw) {
                    Ok(definition) => State::Persisting(definition),
                    Err(errors) => {
                        tracing::debug!("Rejected hero payload: {}", errors);
                        return ProvisioningOutcome::Rejected(errors.into());
                    }
                },
                State::Persisting(definition) => match self.db.create_hero(definition).await {
                    Ok(hero) => State::Provisioning(hero),
                    Err(e) => {
                        tracing::error!("Failed to create hero: {:?}", e);
                        return ProvisioningOutcome::Rejected(e.into());
                    }
                },
                State::Provisioning(hero) => {
                    let result = self
                        .provisioner
                        .provision(
                            &hero.id.to_string(),
                            &hero.model_name,
                            hero.system_prompt.as_deref(),
                            &hero.description,
                            &hero.name,
                        )
                        .await;
                    State::Reconciling(hero, result)
                }
                State::Reconciling(hero, Ok(model)) => {
                    return match self
                        .db
                        .update_hero_model_name(hero.id, model.derived_model_name)
                        .await
                    {
                        Ok(hero) => {
                            tracing::info!("Created hero {} with model {}", hero.id, hero.model_name);
                            ProvisioningOutcome::Completed { hero }
                        }
                        Err(e) => {
                            tracing::error!("Failed to record model for hero {}: {:?}", hero.id, e);
                            ProvisioningOutcome::Rejected(e.into())
                        }
                    };
                }
                State::Reconciling(hero, Err(e)) => {
                    tracing::warn!("Hero {} stored without its own model: {}", hero.id, e);
                    return ProvisioningOutcome::Degraded {
                        hero,
                        warning: format!("{}: {}", DEGRADED_WARNING, e.cause),
                    };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::dbs::memory::MemoryDatabase;
    use crate::heroes::provision::derive_model_name;
    use crate::heroes::provision::tests::ScriptedRuntime;
    use crate::ollama::OllamaClient;
    use crate::ollama::tests::silent_runtime_url;
    use serde_json::json;

    fn setup(
        runtime: ScriptedRuntime,
    ) -> (HeroProvisioning, Arc<MemoryDatabase>, Arc<ScriptedRuntime>) {
        let db = Arc::new(MemoryDatabase::new());
        let runtime = Arc::new(runtime);
        let provisioning = HeroProvisioning::new(
            db.clone(),
            ModelProvisioner::new(runtime.clone(), ProvisionerConfig::default()),
        );
        (provisioning, db, runtime)
    }

    fn einstein() -> Value {
        json!({
            "name": "Einstein",
            "description": "physicist",
            "systemPrompt": "",
            "modelName": "llama3.2:latest",
        })
    }

    #[tokio::test]
    async fn completed_hero_uses_derived_model() {
        let (provisioning, db, runtime) = setup(ScriptedRuntime::succeeding());

        let outcome = provisioning.create_hero(einstein()).await;

        let hero = match outcome {
            ProvisioningOutcome::Completed { hero } => hero,
            other => panic!("expected completed, got {other:?}"),
        };
        assert_eq!(hero.model_name, derive_model_name(&hero.id.to_string()));
        assert!(hero.updated_at > hero.created_at);
        assert_eq!(db.hero_writes(), 2);
        assert_eq!(db.get_hero(hero.id).await.unwrap(), hero);

        let created = runtime.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].model, hero.model_name);
        assert_eq!(created[0].from, "llama3.2:latest");
        assert_eq!(created[0].system, "You are Einstein, physicist");
    }

    #[tokio::test]
    async fn failed_provisioning_degrades_with_one_write() {
        let (provisioning, db, runtime) = setup(ScriptedRuntime::failing());

        let outcome = provisioning.create_hero(einstein()).await;

        let (hero, warning) = match outcome {
            ProvisioningOutcome::Degraded { hero, warning } => (hero, warning),
            other => panic!("expected degraded, got {other:?}"),
        };
        assert_eq!(hero.model_name, "llama3.2:latest");
        assert_eq!(
            warning,
            format!("{}: Model runtime error (500): out of disk", DEGRADED_WARNING)
        );
        assert_eq!(db.hero_writes(), 1);
        assert_eq!(runtime.created().len(), 1);
        assert_eq!(db.get_hero(hero.id).await.unwrap().model_name, "llama3.2:latest");
    }

    #[tokio::test]
    async fn runtime_timeout_degrades_with_one_write() {
        let runtime = OllamaClient::new(&RuntimeConfig {
            base_url: silent_runtime_url().await,
            timeout_secs: 1,
        })
        .unwrap();
        let db = Arc::new(MemoryDatabase::new());
        let provisioning = HeroProvisioning::new(
            db.clone(),
            ModelProvisioner::new(Arc::new(runtime), ProvisionerConfig::default()),
        );

        let outcome = provisioning.create_hero(einstein()).await;

        let (hero, warning) = match outcome {
            ProvisioningOutcome::Degraded { hero, warning } => (hero, warning),
            other => panic!("expected degraded, got {other:?}"),
        };
        assert_eq!(hero.model_name, "llama3.2:latest");
        assert_eq!(
            warning,
            format!("{}: Model runtime timed out after 1s", DEGRADED_WARNING)
        );
        assert_eq!(db.hero_writes(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_writes_nothing() {
        let (provisioning, db, runtime) = setup(ScriptedRuntime::succeeding());

        let outcome = provisioning
            .create_hero(json!({"name": "", "description": "x", "modelName": "m"}))
            .await;

        let errors = match outcome {
            ProvisioningOutcome::Rejected(Rejection::Validation(errors)) => errors,
            other => panic!("expected validation rejection, got {other:?}"),
        };
        assert_eq!(errors.fields().collect::<Vec<_>>(), ["name"]);
        assert_eq!(db.hero_writes(), 0);
        assert!(runtime.created().is_empty());
    }

    #[tokio::test]
    async fn explicit_system_prompt_is_sent_verbatim() {
        let (provisioning, _db, runtime) = setup(ScriptedRuntime::succeeding());

        let outcome = provisioning
            .create_hero(json!({
                "name": "Curie",
                "description": "chemist",
                "systemPrompt": "Speak only of radium.",
                "modelName": "mistral",
            }))
            .await;

        assert!(matches!(outcome, ProvisioningOutcome::Completed { .. }));
        assert_eq!(runtime.created()[0].system, "Speak only of radium.");
        assert_eq!(runtime.created()[0].from, "mistral");
    }

    #[tokio::test]
    async fn outcome_exposes_hero() {
        let (provisioning, _db, _runtime) = setup(ScriptedRuntime::failing());
        let outcome = provisioning.create_hero(einstein()).await;
        assert_eq!(outcome.hero().map(|h| h.name.as_str()), Some("Einstein"));

        let rejected = provisioning.create_hero(json!({})).await;
        assert!(rejected.hero().is_none());
    }
}
