//! Accounts, role assignments and credential checks over SQLite.
//!
//! Values handed to [`AccountStore`] are expected to be sanitized already;
//! the store only normalizes case for lookups and always binds parameters.

mod password;

pub use password::{PasswordHasher, PasswordPolicy};

use crate::shared::time::now_millis;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Admin, Role::User];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: i64,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Username '{0}' is already taken.")]
    DuplicateUsername(String),
    #[error("{}", .0.join(" "))]
    PasswordPolicy(Vec<String>),
    #[error("failed to hash password: {0}")]
    PasswordHash(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    db: SqlitePool,
    policy: PasswordPolicy,
    hasher: PasswordHasher,
}

const ACCOUNT_COLUMNS: &str = "id, username, email, created_at";

impl AccountStore {
    pub fn new(db: SqlitePool, policy: PasswordPolicy, hasher: PasswordHasher) -> Self {
        Self { db, policy, hasher }
    }

    /// Inserts the account and its initial roles in one transaction; a failed
    /// grant leaves no account behind.
    pub async fn create_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
        roles: &[Role],
    ) -> Result<Account, IdentityError> {
        let problems = self.policy.violations(password);
        if !problems.is_empty() {
            return Err(IdentityError::PasswordPolicy(problems));
        }

        let password_hash = self.hash_password(password).await?;
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            created_at: now_millis(),
        };

        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO accounts (id, username, normalized_username, email, normalized_email, password_hash, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.id)
        .bind(&account.username)
        .bind(normalize(username))
        .bind(&account.email)
        .bind(normalize(email))
        .bind(password_hash)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            // The unique index is the only duplicate check, so concurrent
            // registrations of one name cannot both succeed.
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                return Err(IdentityError::DuplicateUsername(username.to_string()));
            }
            Err(error) => return Err(error.into()),
        }

        for role in roles {
            sqlx::query("INSERT OR IGNORE INTO account_roles (account_id, role_name) VALUES (?, ?)")
                .bind(&account.id)
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(account_id = account.id, ?roles, "account created");
        Ok(account)
    }

    async fn hash_password(&self, password: &str) -> Result<String, IdentityError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|error| IdentityError::PasswordHash(error.to_string()))?
            .map_err(|error| IdentityError::PasswordHash(error.to_string()))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Account>, IdentityError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(account_from_row).transpose()?)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<Account>, IdentityError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE normalized_username = ?"
        ))
        .bind(normalize(username))
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(account_from_row).transpose()?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, IdentityError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE normalized_email = ? ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(normalize(email))
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(account_from_row).transpose()?)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, IdentityError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at ASC, username ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        let accounts = rows
            .into_iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    pub async fn add_to_role(&self, account_id: &str, role: Role) -> Result<(), IdentityError> {
        sqlx::query("INSERT OR IGNORE INTO account_roles (account_id, role_name) VALUES (?, ?)")
            .bind(account_id)
            .bind(role.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn is_in_role(&self, account_id: &str, role: Role) -> Result<bool, IdentityError> {
        let row = sqlx::query("SELECT 1 FROM account_roles WHERE account_id = ? AND role_name = ?")
            .bind(account_id)
            .bind(role.as_str())
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    pub async fn roles_for(&self, account_id: &str) -> Result<Vec<Role>, IdentityError> {
        let rows = sqlx::query(
            "SELECT role_name FROM account_roles WHERE account_id = ? ORDER BY role_name ASC",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await?;
        let roles = rows
            .into_iter()
            .filter_map(|row| {
                let name: String = row.try_get("role_name").ok()?;
                name.parse::<Role>().ok()
            })
            .collect();
        Ok(roles)
    }

    /// `None` for an unknown username and for a wrong password alike; both
    /// cost one hash verification.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Account>, IdentityError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS}, password_hash FROM accounts WHERE normalized_username = ?"
        ))
        .bind(normalize(username))
        .fetch_optional(&self.db)
        .await?;
        let (stored_hash, account) = match row {
            Some(row) => {
                let stored_hash: String = row.try_get("password_hash")?;
                (Some(stored_hash), Some(account_from_row(row)?))
            }
            None => (None, None),
        };

        let hasher = self.hasher.clone();
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || match stored_hash {
            Some(stored_hash) => hasher.verify(&password, &stored_hash),
            None => hasher.verify_decoy(&password),
        })
        .await;
        let matches = match verified {
            Ok(matches) => matches,
            Err(error) => {
                tracing::error!(?error, "password verification task failed");
                false
            }
        };
        Ok(account.filter(|_| matches))
    }

    /// Creates the admin account when no account owns `email` yet. An existing
    /// owner that lost `admin` gets it back.
    pub async fn ensure_admin(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Account, IdentityError> {
        if let Some(existing) = self.find_by_email(email).await? {
            if !self.is_in_role(&existing.id, Role::Admin).await? {
                self.add_to_role(&existing.id, Role::Admin).await?;
                tracing::warn!(account_id = existing.id, "restored admin role on seeded account");
            }
            return Ok(existing);
        }
        let account = self
            .create_account(username, email, password, &[Role::Admin])
            .await?;
        tracing::info!(account_id = account.id, "seeded admin account");
        Ok(account)
    }
}

fn normalize(value: &str) -> String {
    value.to_uppercase()
}

fn account_from_row(row: SqliteRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
pub(crate) fn test_store(db: SqlitePool) -> AccountStore {
    AccountStore::new(
        db,
        PasswordPolicy::default(),
        PasswordHasher::with_cost(8, 1).expect("test hasher params should be valid"),
    )
}

#[cfg(test)]
mod tests {
    use super::{test_store, IdentityError, Role};
    use crate::db::memory_pool;
    use sqlx::Row;

    #[tokio::test]
    async fn create_and_find_account() {
        let store = test_store(memory_pool().await);
        let account = store
            .create_account("alice", "alice@example.com", "Alice#123", &[])
            .await
            .expect("account should be created");

        let by_id = store.find_by_id(&account.id).await.unwrap();
        assert_eq!(by_id.as_ref(), Some(&account));
        let by_name = store.find_by_username("ALICE").await.unwrap();
        assert_eq!(by_name.map(|a| a.id), Some(account.id.clone()));
        let by_email = store.find_by_email("Alice@Example.com").await.unwrap();
        assert_eq!(by_email.map(|a| a.id), Some(account.id));
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected_case_insensitively() {
        let store = test_store(memory_pool().await);
        store
            .create_account("alice", "alice@example.com", "Alice#123", &[])
            .await
            .unwrap();
        let error = store
            .create_account("Alice", "other@example.com", "Alice#123", &[])
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(error, IdentityError::DuplicateUsername(name) if name == "Alice"));
    }

    #[tokio::test]
    async fn unique_index_rejects_a_concurrently_inserted_name() {
        let db = memory_pool().await;
        let store = test_store(db.clone());
        // Committed by another writer between our policy check and our insert.
        sqlx::query(
            "INSERT INTO accounts (id, username, normalized_username, email, normalized_email, password_hash, created_at) \
             VALUES ('other', 'frank', 'FRANK', 'frank@example.com', 'FRANK@EXAMPLE.COM', 'x', 0)",
        )
        .execute(&db)
        .await
        .unwrap();

        let error = store
            .create_account("Frank", "frank2@example.com", "Frank#123", &[Role::User])
            .await
            .expect_err("conflicting name should fail");
        assert!(matches!(error, IdentityError::DuplicateUsername(name) if name == "Frank"));

        let rows = sqlx::query("SELECT COUNT(*) AS n FROM account_roles")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(rows.get::<i64, _>("n"), 0);
    }

    #[tokio::test]
    async fn failed_role_grant_rolls_back_the_account() {
        let db = memory_pool().await;
        let store = test_store(db.clone());
        sqlx::query("DELETE FROM roles WHERE name = 'user'")
            .execute(&db)
            .await
            .unwrap();

        let error = store
            .create_account("grace", "grace@example.com", "Grace#123", &[Role::User])
            .await
            .expect_err("grant of a missing role should fail");
        assert!(matches!(error, IdentityError::Database(_)));
        assert!(store.find_by_username("grace").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn initial_roles_are_granted_with_the_account() {
        let store = test_store(memory_pool().await);
        let account = store
            .create_account("heidi", "heidi@example.com", "Heidi#123", &[Role::User])
            .await
            .unwrap();
        assert_eq!(store.roles_for(&account.id).await.unwrap(), vec![Role::User]);
    }

    #[tokio::test]
    async fn weak_password_is_rejected_before_insert() {
        let store = test_store(memory_pool().await);
        let error = store
            .create_account("bob", "bob@example.com", "password", &[])
            .await
            .expect_err("weak password should fail");
        let IdentityError::PasswordPolicy(problems) = error else {
            panic!("expected password policy error");
        };
        assert_eq!(problems.len(), 3);
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn roles_are_idempotent_and_listed() {
        let store = test_store(memory_pool().await);
        let account = store
            .create_account("carol", "carol@example.com", "Carol#123", &[])
            .await
            .unwrap();
        assert!(!store.is_in_role(&account.id, Role::User).await.unwrap());

        store.add_to_role(&account.id, Role::User).await.unwrap();
        store.add_to_role(&account.id, Role::User).await.unwrap();
        store.add_to_role(&account.id, Role::Admin).await.unwrap();

        assert!(store.is_in_role(&account.id, Role::User).await.unwrap());
        assert_eq!(
            store.roles_for(&account.id).await.unwrap(),
            vec![Role::Admin, Role::User]
        );
    }

    #[tokio::test]
    async fn verify_credentials_checks_password() {
        let store = test_store(memory_pool().await);
        let account = store
            .create_account("dave", "dave@example.com", "Dave#1234", &[])
            .await
            .unwrap();

        let ok = store.verify_credentials("dave", "Dave#1234").await.unwrap();
        assert_eq!(ok.map(|a| a.id), Some(account.id));
        assert!(store.verify_credentials("dave", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_username_still_pays_for_a_hash_check() {
        let store = test_store(memory_pool().await);
        assert!(store.verify_credentials("erin", "Erin#1234").await.unwrap().is_none());
        assert!(store.verify_credentials("erin", "").await.unwrap().is_none());
        assert!(store.hasher.has_decoy());
    }

    #[tokio::test]
    async fn ensure_admin_seeds_once() {
        let store = test_store(memory_pool().await);
        let first = store
            .ensure_admin("admin", "admin@example.com", "Admin#123")
            .await
            .unwrap();
        let second = store
            .ensure_admin("admin", "admin@example.com", "Admin#123")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.roles_for(&first.id).await.unwrap(), vec![Role::Admin]);
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_admin_restores_a_missing_admin_role() {
        let store = test_store(memory_pool().await);
        let existing = store
            .create_account("admin", "admin@example.com", "Admin#123", &[])
            .await
            .unwrap();
        let seeded = store
            .ensure_admin("admin", "admin@example.com", "Admin#123")
            .await
            .unwrap();
        assert_eq!(seeded.id, existing.id);
        assert!(store.is_in_role(&existing.id, Role::Admin).await.unwrap());
    }

    #[test]
    fn role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("superuser".parse::<Role>().is_err());
    }
}
