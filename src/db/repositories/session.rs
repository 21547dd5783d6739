//! Session repository
//!
//! Database operations for server-side sessions.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! The session store exclusively owns session rows: identity is re-read from
//! here on every request, so a deleted row takes effect immediately.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Session, SessionPayload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new session row
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Bind an identity to an existing session and refresh its expiry
    async fn bind_identity(
        &self,
        id: &str,
        payload: &SessionPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Store the session's anti-forgery token
    async fn set_csrf_token(&self, id: &str, token: &str) -> Result<()>;

    /// Delete a session
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete all sessions for a user
    async fn delete_by_user(&self, user_id: i64) -> Result<()>;

    /// Delete expired sessions, returning how many were removed
    async fn delete_expired(&self) -> Result<i64>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_session_sqlite(self.pool.as_sqlite().unwrap(), session).await
            }
            DatabaseDriver::Mysql => {
                create_session_mysql(self.pool.as_mysql().unwrap(), session).await
            }
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_session_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await
            }
            DatabaseDriver::Mysql => {
                get_session_by_id_mysql(self.pool.as_mysql().unwrap(), id).await
            }
        }
    }

    async fn bind_identity(
        &self,
        id: &str,
        payload: &SessionPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                bind_identity_sqlite(self.pool.as_sqlite().unwrap(), id, payload, expires_at).await
            }
            DatabaseDriver::Mysql => {
                bind_identity_mysql(self.pool.as_mysql().unwrap(), id, payload, expires_at).await
            }
        }
    }

    async fn set_csrf_token(&self, id: &str, token: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                set_csrf_token_sqlite(self.pool.as_sqlite().unwrap(), id, token).await
            }
            DatabaseDriver::Mysql => {
                set_csrf_token_mysql(self.pool.as_mysql().unwrap(), id, token).await
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_session_sqlite(self.pool.as_sqlite().unwrap(), id).await
            }
            DatabaseDriver::Mysql => delete_session_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_sessions_by_user_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                delete_sessions_by_user_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }

    async fn delete_expired(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_expired_sessions_sqlite(self.pool.as_sqlite().unwrap()).await
            }
            DatabaseDriver::Mysql => {
                delete_expired_sessions_mysql(self.pool.as_mysql().unwrap()).await
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<Session> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, user_name, csrf_token, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(session.user_id)
    .bind(&session.user_name)
    .bind(&session.csrf_token)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(session.clone())
}

async fn get_session_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, user_name, csrf_token, expires_at, created_at
        FROM sessions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_session_sqlite(&row))),
        None => Ok(None),
    }
}

async fn bind_identity_sqlite(
    pool: &SqlitePool,
    id: &str,
    payload: &SessionPayload,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sessions
        SET user_id = ?, user_name = ?, expires_at = ?
        WHERE id = ?
        "#,
    )
    .bind(payload.user_id)
    .bind(&payload.user_name)
    .bind(expires_at)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to bind identity to session")?;

    Ok(())
}

async fn set_csrf_token_sqlite(pool: &SqlitePool, id: &str, token: &str) -> Result<()> {
    sqlx::query("UPDATE sessions SET csrf_token = ? WHERE id = ?")
        .bind(token)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to set csrf token")?;

    Ok(())
}

async fn delete_session_sqlite(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_sessions_by_user_sqlite(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to delete sessions by user")?;

    Ok(())
}

async fn delete_expired_sessions_sqlite(pool: &SqlitePool) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected() as i64)
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        user_name: row.get("user_name"),
        csrf_token: row.get("csrf_token"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &Session) -> Result<Session> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, user_name, csrf_token, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(session.user_id)
    .bind(&session.user_name)
    .bind(&session.csrf_token)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(session.clone())
}

async fn get_session_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, user_name, csrf_token, expires_at, created_at
        FROM sessions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_session_mysql(&row))),
        None => Ok(None),
    }
}

async fn bind_identity_mysql(
    pool: &MySqlPool,
    id: &str,
    payload: &SessionPayload,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sessions
        SET user_id = ?, user_name = ?, expires_at = ?
        WHERE id = ?
        "#,
    )
    .bind(payload.user_id)
    .bind(&payload.user_name)
    .bind(expires_at)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to bind identity to session")?;

    Ok(())
}

async fn set_csrf_token_mysql(pool: &MySqlPool, id: &str, token: &str) -> Result<()> {
    sqlx::query("UPDATE sessions SET csrf_token = ? WHERE id = ?")
        .bind(token)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to set csrf token")?;

    Ok(())
}

async fn delete_session_mysql(pool: &MySqlPool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_sessions_by_user_mysql(pool: &MySqlPool, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to delete sessions by user")?;

    Ok(())
}

async fn delete_expired_sessions_mysql(pool: &MySqlPool) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected() as i64)
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        user_name: row.get("user_name"),
        csrf_token: row.get("csrf_token"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}
