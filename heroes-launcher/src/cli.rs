use backend::config::{
    AppConfig, ConfigError, DEFAULT_HERO_DESCRIPTION, DEFAULT_RUNTIME_TIMEOUT_SECS,
    DEFAULT_RUNTIME_URL, ProvisionerConfig, RuntimeConfig,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use shared::models::Role;
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Serve the heroes backend or manage its users")]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn app_config(&self) -> Result<AppConfig, ConfigError> {
        let config = self.backend.app_config()?;
        if matches!(self.command, Command::CreateUser { .. }) {
            config.require_persistent()?;
        }
        Ok(config)
    }
}

#[derive(Args)]
pub struct BackendArgs {
    /// `memory`, `sqlite:<path>` or `postgres://...`
    #[arg(long, env = "HEROES_DATABASE_URL", default_value = "memory", global = true)]
    pub database_url: String,
    #[arg(long, env = "HEROES_OLLAMA_URL", default_value = DEFAULT_RUNTIME_URL, global = true)]
    pub ollama_url: String,
    #[arg(
        long,
        env = "HEROES_RUNTIME_TIMEOUT_SECS",
        default_value_t = DEFAULT_RUNTIME_TIMEOUT_SECS,
        global = true
    )]
    pub runtime_timeout_secs: u64,
    /// Build every hero model from this base model
    #[arg(long, env = "HEROES_PINNED_BASE_MODEL", global = true)]
    pub pinned_base_model: Option<String>,
}

impl BackendArgs {
    pub fn app_config(&self) -> Result<AppConfig, ConfigError> {
        AppConfig::new(
            &self.database_url,
            RuntimeConfig {
                base_url: self.ollama_url.clone(),
                timeout_secs: self.runtime_timeout_secs,
            },
            ProvisionerConfig {
                pinned_base_model: self.pinned_base_model.clone(),
                default_description: DEFAULT_HERO_DESCRIPTION.to_string(),
            },
        )
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Directory of static files served for non-API paths
        #[arg(long)]
        static_dir: Option<PathBuf>,
        /// Create this admin on startup and print a fresh token for it
        #[arg(long, env = "HEROES_ADMIN_EMAIL")]
        admin_email: Option<String>,
        #[arg(long, env = "HEROES_ADMIN_NAME", requires = "admin_email")]
        admin_name: Option<String>,
    },
    /// Create or update a user and print a new bearer token
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = RoleArg::User)]
        role: RoleArg,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Admin,
    User,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => Role::Admin,
            RoleArg::User => Role::User,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_user() {
        let cli = Cli::parse_from([
            "heroes-launcher",
            "--database-url",
            "sqlite:heroes.db",
            "create-user",
            "--email",
            "admin@example.com",
            "--role",
            "admin",
        ]);
        assert_eq!(cli.backend.database_url, "sqlite:heroes.db");
        match cli.command {
            Command::CreateUser { email, name, role } => {
                assert_eq!(email, "admin@example.com");
                assert_eq!(name, None);
                assert_eq!(Role::from(role), Role::Admin);
            }
            Command::Serve { .. } => panic!("expected create-user"),
        }
    }

    #[test]
    fn create_user_needs_a_persistent_database() {
        let cli = Cli::parse_from([
            "heroes-launcher",
            "create-user",
            "--email",
            "admin@example.com",
        ]);
        assert!(matches!(cli.app_config(), Err(ConfigError::EphemeralDatabase)));

        let cli = Cli::parse_from([
            "heroes-launcher",
            "--database-url",
            "sqlite:heroes.db",
            "create-user",
            "--email",
            "admin@example.com",
        ]);
        assert!(cli.app_config().is_ok());
    }

    #[test]
    fn serve_accepts_bootstrap_admin() {
        let cli = Cli::parse_from([
            "heroes-launcher",
            "serve",
            "--admin-email",
            "root@example.com",
            "--admin-name",
            "Root",
        ]);
        assert!(cli.app_config().is_ok());
        match cli.command {
            Command::Serve {
                admin_email,
                admin_name,
                ..
            } => {
                assert_eq!(admin_email.as_deref(), Some("root@example.com"));
                assert_eq!(admin_name.as_deref(), Some("Root"));
            }
            Command::CreateUser { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn serve_config_rejects_zero_timeout() {
        let cli = Cli::parse_from(["heroes-launcher", "serve", "--runtime-timeout-secs", "0"]);
        assert!(cli.backend.app_config().is_err());
    }
}
