use crate::dbs::DatabaseConfig;
use thiserror::Error;

pub const DEFAULT_RUNTIME_URL: &str = "http://localhost:11434";
pub const DEFAULT_RUNTIME_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HERO_DESCRIPTION: &str = "a helpful AI assistant.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported database url: {0}")]
    DatabaseUrl(String),
    #[error("Runtime timeout must be at least one second")]
    Timeout,
    #[error("The in-memory database is dropped when the command exits; pass a sqlite: or postgres:// url")]
    EphemeralDatabase,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub runtime: RuntimeConfig,
    pub provisioning: ProvisionerConfig,
}

impl AppConfig {
    pub fn new(
        database_url: &str,
        runtime: RuntimeConfig,
        provisioning: ProvisionerConfig,
    ) -> Result<Self, ConfigError> {
        let database = DatabaseConfig::from_url(database_url)
            .ok_or_else(|| ConfigError::DatabaseUrl(database_url.to_string()))?;
        if runtime.timeout_secs == 0 {
            return Err(ConfigError::Timeout);
        }
        Ok(Self {
            database,
            runtime,
            provisioning,
        })
    }

    /// Fails for stores that do not outlive the process.
    pub fn require_persistent(&self) -> Result<(), ConfigError> {
        match self.database {
            DatabaseConfig::Memory => Err(ConfigError::EphemeralDatabase),
            DatabaseConfig::Local { .. } | DatabaseConfig::Postgres { .. } => Ok(()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::Memory,
            runtime: RuntimeConfig::default(),
            provisioning: ProvisionerConfig::default(),
        }
    }
}

/// Where the model runtime lives and how long a single call may take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_RUNTIME_URL.to_string(),
            timeout_secs: DEFAULT_RUNTIME_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// When set, every hero model is built from this base model instead of
    /// the one chosen in the hero definition.
    pub pinned_base_model: Option<String>,
    /// Used in the synthesized system prompt when a hero has no description.
    pub default_description: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            pinned_base_model: None,
            default_description: DEFAULT_HERO_DESCRIPTION.to_string(),
        }
    }
}
