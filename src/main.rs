use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod db;
mod identity;
mod shared;

use app::{AppState, SessionSettings};
use config::AppConfig;
use identity::{AccountStore, PasswordHasher, PasswordPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;
    let db = db::connect(&config.database_url, config.database_max_connections).await?;
    if config.is_in_memory_database() {
        tracing::warn!("using an in-memory database, accounts are lost on exit");
    }

    let accounts = AccountStore::new(
        db,
        PasswordPolicy::with_min_length(config.password_min_length),
        PasswordHasher::default(),
    );

    if config.seed_admin {
        accounts
            .ensure_admin(
                &config.admin.username,
                &config.admin.email,
                &config.admin.password,
            )
            .await?;
    }

    let state = Arc::new(AppState {
        accounts,
        sessions: SessionSettings {
            secret: config.session_secret.clone(),
            ttl_secs: config.session_ttl_secs,
            cookie_secure: config.cookie_secure,
        },
    });

    let app = app::build_router(state);

    let address = format!("0.0.0.0:{}", config.port);
    tracing::info!("listening on {address}");

    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
