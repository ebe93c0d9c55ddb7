mod cli;

use axum::Router;
use backend::AppState;
use clap::Parser;
use cli::{Cli, Command};
use shared::models::Role;
use tower_http::services::ServeDir;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let cli = Cli::parse();
    let config = cli.app_config()?;
    let state = AppState::from_config(&config).await?;

    match cli.command {
        Command::Serve {
            host,
            port,
            static_dir,
            admin_email,
            admin_name,
        } => {
            if let Some(email) = admin_email {
                let (admin, token) =
                    backend::issue_token(state.db.as_ref(), email, admin_name, Role::Admin)
                        .await?;
                println!("admin {} token: {}", admin.email, token);
            }
            let router = match static_dir {
                Some(dir) => Router::new().fallback_service(ServeDir::new(dir)),
                None => Router::new(),
            };
            let addr = format!("{}:{}", host, port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("Listening on {}", listener.local_addr()?);
            let router = backend::init(router, state);
            axum::serve(listener, router).await?;
        }
        Command::CreateUser { email, name, role } => {
            let (user, token) =
                backend::issue_token(state.db.as_ref(), email, name, role.into()).await?;
            println!("{} {}", user.id, user.email);
            println!("token: {}", token);
        }
    }
    Ok(())
}
