use crate::config::ProvisionerConfig;
use crate::ollama::{CreateModelRequest, ModelRuntime, RuntimeError};
use std::sync::Arc;
use thiserror::Error;

const MODEL_NAME_PREFIX: &str = "hero-";

/// Runtime model name for a hero: `hero-` followed by the lowercased id, with
/// anything outside `[a-z0-9-_]` replaced by `-`.
pub fn derive_model_name(hero_id: &str) -> String {
    let sanitized: String = hero_id
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' => c,
            _ => '-',
        })
        .collect();
    format!("{}{}", MODEL_NAME_PREFIX, sanitized)
}

/// The hero's own system prompt, or one synthesized from its name and
/// description when it has none.
pub fn effective_system_prompt(
    system_prompt: Option<&str>,
    hero_name: &str,
    description: &str,
    config: &ProvisionerConfig,
) -> String {
    match system_prompt {
        Some(prompt) if !prompt.is_empty() => prompt.to_string(),
        _ => {
            let description = if description.is_empty() {
                config.default_description.as_str()
            } else {
                description
            };
            format!("You are {}, {}", hero_name, description)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedModel {
    pub derived_model_name: String,
}

/// A failed provisioning attempt. The derived name is kept so a caller can
/// report or reuse it.
#[derive(Error, Debug)]
#[error("Failed to create model {derived_model_name}: {cause}")]
pub struct ProvisionError {
    pub derived_model_name: String,
    #[source]
    pub cause: RuntimeError,
}

#[derive(Clone)]
pub struct ModelProvisioner {
    runtime: Arc<dyn ModelRuntime>,
    config: ProvisionerConfig,
}

impl ModelProvisioner {
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: ProvisionerConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Ask the runtime for a hero-specific model. One call, no retries.
    pub async fn provision(
        &self,
        hero_id: &str,
        base_model: &str,
        system_prompt: Option<&str>,
        description: &str,
        hero_name: &str,
    ) -> Result<ProvisionedModel, ProvisionError> {
        let derived_model_name = derive_model_name(hero_id);
        let from = self
            .config
            .pinned_base_model
            .as_deref()
            .unwrap_or(base_model);
        let request = CreateModelRequest {
            model: derived_model_name.clone(),
            from: from.to_string(),
            system: effective_system_prompt(system_prompt, hero_name, description, &self.config),
        };

        match self.runtime.create_model(&request).await {
            Ok(()) => Ok(ProvisionedModel { derived_model_name }),
            Err(cause) => Err(ProvisionError {
                derived_model_name,
                cause,
            }),
        }
    }
}
