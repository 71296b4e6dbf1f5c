use crate::config::is_in_memory_url;
use anyhow::Context;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::PathBuf;

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    ensure_db_dir(database_url)?;

    let mut options = SqlitePoolOptions::new().max_connections(max_connections);
    if is_in_memory_url(database_url) {
        // Every in-memory connection is its own database; keep exactly one alive.
        options = options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let db = options
        .connect(database_url)
        .await
        .with_context(|| format!("failed to connect to {database_url}"))?;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("failed to run database migrations")?;
    Ok(db)
}

fn ensure_db_dir(database_url: &str) -> anyhow::Result<()> {
    if is_in_memory_url(database_url) {
        return Ok(());
    }
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"));
    let Some(path) = path else { return Ok(()) };
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }
    let db_path = PathBuf::from(path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if !db_path.exists() {
        std::fs::File::create(&db_path)
            .with_context(|| format!("failed to create {}", db_path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    connect("sqlite::memory:", 1)
        .await
        .expect("in-memory database should open")
}

#[cfg(test)]
mod tests {
    use super::{ensure_db_dir, memory_pool};
    use sqlx::Row;

    #[test]
    fn ensure_db_dir_skips_memory_and_non_sqlite_urls() {
        assert!(ensure_db_dir("sqlite::memory:").is_ok());
        assert!(ensure_db_dir("postgres://localhost/accounts").is_ok());
    }

    #[test]
    fn ensure_db_dir_creates_parent_and_file() {
        let base = std::env::temp_dir().join(format!("accounts-{}", uuid::Uuid::new_v4().simple()));
        let db_path = base.join("nested").join("accounts.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        ensure_db_dir(&url).expect("directory should be created");
        assert!(db_path.exists());
        let _ = std::fs::remove_dir_all(base);
    }

    #[tokio::test]
    async fn migrations_seed_both_roles() {
        let db = memory_pool().await;
        let rows = sqlx::query("SELECT name FROM roles ORDER BY name")
            .fetch_all(&db)
            .await
            .unwrap();
        let names = rows
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["admin".to_string(), "user".to_string()]);
    }
}
