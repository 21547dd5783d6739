//! User repository
//!
//! Database operations for user accounts.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for account data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL
//!
//! Email uniqueness is enforced by the store's unique index; a violation is
//! surfaced as [`DuplicateEmailViolation`] so callers can tell a conflicting
//! insert apart from an unavailable store even when two creates race.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::User;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Marker error surfaced when an insert or update trips the unique email index.
#[derive(Debug, thiserror::Error)]
#[error("email address is already registered")]
pub struct DuplicateEmailViolation;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by email (exact, case-sensitive match)
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Update a user
    async fn update(&self, user: &User) -> Result<User>;

    /// Delete a user together with every session row it owns, atomically
    async fn delete_with_sessions(&self, id: i64) -> Result<()>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// List users ordered by creation time descending, with the total count
    async fn list(&self, page: i64, limit: i64) -> Result<(Vec<User>, i64)>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.as_sqlite().unwrap(), user).await,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.as_mysql().unwrap(), user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_user_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_user_by_email_sqlite(self.pool.as_sqlite().unwrap(), email).await
            }
            DatabaseDriver::Mysql => {
                get_user_by_email_mysql(self.pool.as_mysql().unwrap(), email).await
            }
        }
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_user_sqlite(self.pool.as_sqlite().unwrap(), user).await,
            DatabaseDriver::Mysql => update_user_mysql(self.pool.as_mysql().unwrap(), user).await,
        }
    }

    async fn delete_with_sessions(&self, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_user_with_sessions_sqlite(self.pool.as_sqlite().unwrap(), id).await
            }
            DatabaseDriver::Mysql => {
                delete_user_with_sessions_mysql(self.pool.as_mysql().unwrap(), id).await
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => count_users_sqlite(self.pool.as_sqlite().unwrap()).await,
            DatabaseDriver::Mysql => count_users_mysql(self.pool.as_mysql().unwrap()).await,
        }
    }

    async fn list(&self, page: i64, limit: i64) -> Result<(Vec<User>, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_users_sqlite(self.pool.as_sqlite().unwrap(), page, limit).await
            }
            DatabaseDriver::Mysql => {
                list_users_mysql(self.pool.as_mysql().unwrap(), page, limit).await
            }
        }
    }
}

/// Map an insert/update failure, lifting unique-index violations out of the
/// generic store-error path.
fn map_write_error(e: sqlx::Error, action: &str) -> anyhow::Error {
    match &e {
        sqlx::Error::Database(db)
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            anyhow::Error::new(DuplicateEmailViolation)
        }
        _ => anyhow::Error::new(e).context(format!("Failed to {}", action)),
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (name, email, password_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| map_write_error(e, "create user"))?;

    let id = result.last_insert_rowid();

    Ok(User {
        id,
        name: user.name.clone(),
        email: user.email.clone(),
        password_hash: user.password_hash.clone(),
        created_at: now,
        updated_at: now,
    })
}

async fn get_user_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, password_hash, created_at, updated_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_user_sqlite(&row))),
        None => Ok(None),
    }
}

async fn get_user_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, password_hash, created_at, updated_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by email")?;

    match row {
        Some(row) => Ok(Some(row_to_user_sqlite(&row))),
        None => Ok(None),
    }
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE users
        SET name = ?, email = ?, password_hash = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(now)
    .bind(user.id)
    .execute(pool)
    .await
    .map_err(|e| map_write_error(e, "update user"))?;

    get_user_by_id_sqlite(pool, user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

async fn delete_user_with_sessions_sqlite(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin delete transaction")?;

    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete user sessions")?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete user")?;

    tx.commit().await.context("Failed to commit delete")?;

    Ok(())
}

async fn count_users_sqlite(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(row.get("count"))
}

async fn list_users_sqlite(pool: &SqlitePool, page: i64, limit: i64) -> Result<(Vec<User>, i64)> {
    let offset = (page - 1) * limit;

    let rows = sqlx::query(
        r#"
        SELECT id, name, email, password_hash, created_at, updated_at
        FROM users
        ORDER BY created_at DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list users")?;

    let users = rows.iter().map(row_to_user_sqlite).collect();
    let total = count_users_sqlite(pool).await?;

    Ok((users, total))
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (name, email, password_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| map_write_error(e, "create user"))?;

    let id = result.last_insert_id() as i64;

    Ok(User {
        id,
        name: user.name.clone(),
        email: user.email.clone(),
        password_hash: user.password_hash.clone(),
        created_at: now,
        updated_at: now,
    })
}

async fn get_user_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, password_hash, created_at, updated_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_user_mysql(&row))),
        None => Ok(None),
    }
}

async fn get_user_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, password_hash, created_at, updated_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by email")?;

    match row {
        Some(row) => Ok(Some(row_to_user_mysql(&row))),
        None => Ok(None),
    }
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE users
        SET name = ?, email = ?, password_hash = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(now)
    .bind(user.id)
    .execute(pool)
    .await
    .map_err(|e| map_write_error(e, "update user"))?;

    get_user_by_id_mysql(pool, user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

async fn delete_user_with_sessions_mysql(pool: &MySqlPool, id: i64) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin delete transaction")?;

    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete user sessions")?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete user")?;

    tx.commit().await.context("Failed to commit delete")?;

    Ok(())
}

async fn count_users_mysql(pool: &MySqlPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(row.get("count"))
}

async fn list_users_mysql(pool: &MySqlPool, page: i64, limit: i64) -> Result<(Vec<User>, i64)> {
    let offset = (page - 1) * limit;

    let rows = sqlx::query(
        r#"
        SELECT id, name, email, password_hash, created_at, updated_at
        FROM users
        ORDER BY created_at DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list users")?;

    let users = rows.iter().map(row_to_user_mysql).collect();
    let total = count_users_mysql(pool).await?;

    Ok((users, total))
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SessionRepository, SqlxSessionRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::Session;
    use chrono::Duration;

    async fn setup_test_repo() -> (DynDatabasePool, SqlxUserRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxUserRepository::new(pool.clone());
        (pool, repo)
    }

    fn test_user(name: &str, email: &str) -> User {
        User::new(name.to_string(), email.to_string(), "hash".to_string())
    }

    #[tokio::test]
    async fn test_create_assigns_id() {
        let (_pool, repo) = setup_test_repo().await;

        let created = repo
            .create(&test_user("alice01", "a@example.com"))
            .await
            .expect("create");

        assert!(created.id > 0);
        assert_eq!(created.name, "alice01");
    }

    #[tokio::test]
    async fn test_duplicate_email_is_distinguishable() {
        let (_pool, repo) = setup_test_repo().await;

        repo.create(&test_user("alice01", "same@example.com"))
            .await
            .expect("first create");

        let err = repo
            .create(&test_user("bob02", "same@example.com"))
            .await
            .expect_err("second create must fail");

        assert!(err.is::<DuplicateEmailViolation>());

        // Exactly one record survives for that email
        assert_eq!(repo.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_get_by_email_is_case_sensitive() {
        let (_pool, repo) = setup_test_repo().await;

        repo.create(&test_user("alice01", "Alice@example.com"))
            .await
            .expect("create");

        assert!(repo
            .get_by_email("Alice@example.com")
            .await
            .expect("lookup")
            .is_some());
        assert!(repo
            .get_by_email("alice@example.com")
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn test_update_changes_fields() {
        let (_pool, repo) = setup_test_repo().await;

        let mut user = repo
            .create(&test_user("alice01", "a@example.com"))
            .await
            .expect("create");

        user.name = "alice02".to_string();
        user.email = "a2@example.com".to_string();
        let updated = repo.update(&user).await.expect("update");

        assert_eq!(updated.name, "alice02");
        assert_eq!(updated.email, "a2@example.com");
    }

    #[tokio::test]
    async fn test_update_to_taken_email_is_distinguishable() {
        let (_pool, repo) = setup_test_repo().await;

        repo.create(&test_user("alice01", "a@example.com"))
            .await
            .expect("create a");
        let mut bob = repo
            .create(&test_user("bob02", "b@example.com"))
            .await
            .expect("create b");

        bob.email = "a@example.com".to_string();
        let err = repo.update(&bob).await.expect_err("update must fail");
        assert!(err.is::<DuplicateEmailViolation>());
    }

    #[tokio::test]
    async fn test_delete_with_sessions_cascades() {
        let (pool, repo) = setup_test_repo().await;

        let user = repo
            .create(&test_user("alice01", "a@example.com"))
            .await
            .expect("create");

        // Two sessions for the user, one anonymous bystander
        let session_repo = SqlxSessionRepository::new(pool.clone());
        let now = Utc::now();
        for sid in ["s-1", "s-2"] {
            session_repo
                .create(&Session {
                    id: sid.to_string(),
                    user_id: Some(user.id),
                    user_name: Some(user.name.clone()),
                    csrf_token: None,
                    expires_at: now + Duration::days(7),
                    created_at: now,
                })
                .await
                .expect("session");
        }
        session_repo
            .create(&Session {
                id: "s-anon".to_string(),
                user_id: None,
                user_name: None,
                csrf_token: None,
                expires_at: now + Duration::days(7),
                created_at: now,
            })
            .await
            .expect("anon session");

        repo.delete_with_sessions(user.id).await.expect("delete");

        assert!(repo.get_by_id(user.id).await.expect("get").is_none());
        assert!(session_repo.get_by_id("s-1").await.expect("get").is_none());
        assert!(session_repo.get_by_id("s-2").await.expect("get").is_none());
        // Unrelated anonymous session survives
        assert!(session_repo.get_by_id("s-anon").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_and_counts() {
        let (_pool, repo) = setup_test_repo().await;

        for i in 0..25 {
            repo.create(&test_user(
                &format!("user{:02}", i),
                &format!("user{:02}@example.com", i),
            ))
            .await
            .expect("create");
        }

        let (first_page, total) = repo.list(1, 10).await.expect("list");
        assert_eq!(total, 25);
        assert_eq!(first_page.len(), 10);
        assert_eq!(first_page[0].name, "user24");

        let (third_page, _) = repo.list(3, 10).await.expect("list");
        assert_eq!(third_page.len(), 5);
        assert_eq!(third_page[4].name, "user00");
    }
}
