use crate::shared::sanitize::{sanitize_identifier, SanitizeMode};
use anyhow::bail;
use std::env;
use std::path::PathBuf;

const DEFAULT_SESSION_TTL_SECS: i64 = 14 * 24 * 60 * 60;
const MAX_SESSION_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub session_secret: String,
    pub session_ttl_secs: i64,
    pub cookie_secure: bool,
    pub password_min_length: usize,
    pub seed_admin: bool,
    pub admin: AdminSeed,
}

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| default_database_url()),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|value| value.parse::<u32>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(5),
            port: env::var("PORT")
                .ok()
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(8787),
            session_secret: match env::var("SESSION_SECRET") {
                Ok(value) => value.trim().to_string(),
                Err(_) => {
                    tracing::warn!(
                        "SESSION_SECRET not set, sessions will not survive a restart"
                    );
                    ephemeral_secret()
                }
            },
            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|value| value.parse::<i64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_SESSION_TTL_SECS),
            cookie_secure: env_flag("COOKIE_SECURE", false),
            password_min_length: env::var("PASSWORD_MIN_LENGTH")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(6),
            seed_admin: env_flag("SEED_ADMIN", true),
            admin: AdminSeed {
                username: env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
                email: env::var("ADMIN_EMAIL")
                    .unwrap_or_else(|_| "admin@example.com".to_string()),
                password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "Admin#123".to_string()),
            },
        }
        .validate()
    }

    fn validate(self) -> anyhow::Result<Self> {
        if self.session_secret.is_empty() {
            bail!("SESSION_SECRET must not be empty");
        }
        if !(1..=MAX_SESSION_TTL_SECS).contains(&self.session_ttl_secs) {
            bail!(
                "SESSION_TTL_SECS must be between 1 and {MAX_SESSION_TTL_SECS}, got {}",
                self.session_ttl_secs
            );
        }
        if self.seed_admin {
            let admin = &self.admin;
            if sanitize_identifier(&admin.username, SanitizeMode::Username) != admin.username {
                bail!("ADMIN_USERNAME may only contain ASCII letters, digits, '_' and '-'");
            }
            if sanitize_identifier(&admin.email, SanitizeMode::Email) != admin.email {
                bail!("ADMIN_EMAIL may only contain ASCII letters, digits, '@', '.', '_' and '-'");
            }
        }
        Ok(self)
    }

    pub fn is_in_memory_database(&self) -> bool {
        is_in_memory_url(&self.database_url)
    }
}

pub fn is_in_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:")
        || database_url == "sqlite://:memory:"
        || database_url.contains("mode=memory")
}

fn default_database_url() -> String {
    let base = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let default_path = base.join("data").join("accounts.db");
    format!("sqlite://{}", default_path.display())
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|value| parse_flag(&value))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE")
}

fn ephemeral_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}
