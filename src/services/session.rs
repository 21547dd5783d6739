//! Session service
//!
//! Owns the session lifecycle end to end:
//! - anonymous session rows opened before login so a CSRF token has
//!   something to bind to
//! - identity serialization into the durable session payload and
//!   deserialization back, re-checked against the user store on every
//!   request (a deleted account invalidates its sessions immediately)
//! - per-session CSRF tokens, issued once and compared in constant time
//! - expiry, both lazily on lookup and via the background sweep
//!
//! Nothing here caches identity across requests; every resolve is a fresh
//! store round-trip.

use std::sync::Arc;

use chrono::{Duration, Utc};
use data_encoding::HEXLOWER;
use uuid::Uuid;

use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{PublicUser, Session, SessionPayload};

/// Error type for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session or user store could not be reached
    #[error("session store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

/// Manages session rows, their serialized identities, and CSRF tokens.
pub struct SessionService {
    session_repo: Arc<dyn SessionRepository>,
    user_repo: Arc<dyn UserRepository>,
    ttl_days: i64,
}

impl SessionService {
    /// Create a new session service
    pub fn new(
        session_repo: Arc<dyn SessionRepository>,
        user_repo: Arc<dyn UserRepository>,
        ttl_days: i64,
    ) -> Self {
        Self {
            session_repo,
            user_repo,
            ttl_days,
        }
    }

    /// Open a fresh anonymous session row.
    pub async fn open_anonymous(&self) -> Result<Session, SessionError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            user_name: None,
            csrf_token: None,
            expires_at: now + Duration::days(self.ttl_days),
            created_at: now,
        };

        let created = self.session_repo.create(&session).await?;
        Ok(created)
    }

    /// Look up a live session, purging it lazily if it has expired.
    pub async fn find(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let session = match self.session_repo.get_by_id(session_id).await? {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            let _ = self.session_repo.delete(session_id).await;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Bind an authenticated identity into a session.
    ///
    /// When the caller already holds a live session (the usual case: the CSRF
    /// token round-trip opened one), the identity lands in that same row so
    /// the token issued before login stays bound. Otherwise a new row is
    /// created. Either way the expiry window restarts.
    pub async fn establish(
        &self,
        current: Option<&str>,
        identity: &PublicUser,
    ) -> Result<Session, SessionError> {
        let payload = SessionPayload::from_identity(identity);
        let expires_at = Utc::now() + Duration::days(self.ttl_days);

        if let Some(session_id) = current {
            if let Some(mut session) = self.find(session_id).await? {
                self.session_repo
                    .bind_identity(&session.id, &payload, expires_at)
                    .await?;
                session.user_id = Some(payload.user_id);
                session.user_name = Some(payload.user_name);
                session.expires_at = expires_at;
                return Ok(session);
            }
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: Some(payload.user_id),
            user_name: Some(payload.user_name),
            csrf_token: None,
            expires_at,
            created_at: now,
        };
        let created = self.session_repo.create(&session).await?;
        Ok(created)
    }

    /// Reconstruct the identity a session payload stands for.
    ///
    /// The referenced account is re-read from the user store; if it no longer
    /// exists the payload is invalid and `None` is returned. For a live
    /// account this is the inverse of serialization, with the name taken from
    /// the current record.
    pub async fn deserialize(
        &self,
        payload: &SessionPayload,
    ) -> Result<Option<PublicUser>, SessionError> {
        let user = self.user_repo.get_by_id(payload.user_id).await?;
        Ok(user.map(|u| u.public()))
    }

    /// Resolve a session id to its authenticated identity.
    ///
    /// Returns `None` for missing, expired, or anonymous sessions, and for
    /// sessions whose account has been deleted (the stale row is dropped so
    /// the id cannot come back).
    pub async fn resolve(&self, session_id: &str) -> Result<Option<PublicUser>, SessionError> {
        let session = match self.find(session_id).await? {
            Some(s) => s,
            None => return Ok(None),
        };

        let payload = match session.payload() {
            Some(p) => p,
            None => return Ok(None),
        };

        match self.deserialize(&payload).await? {
            Some(identity) => Ok(Some(identity)),
            None => {
                let _ = self.session_repo.delete(session_id).await;
                Ok(None)
            }
        }
    }

    /// Delete a single session (logout).
    pub async fn invalidate(&self, session_id: &str) -> Result<(), SessionError> {
        self.session_repo.delete(session_id).await?;
        Ok(())
    }

    /// Delete every session belonging to a user.
    pub async fn invalidate_user(&self, user_id: i64) -> Result<(), SessionError> {
        self.session_repo.delete_by_user(user_id).await?;
        Ok(())
    }

    /// Remove expired sessions. Called by the background sweeper.
    pub async fn sweep_expired(&self) -> Result<i64, SessionError> {
        let count = self.session_repo.delete_expired().await?;
        Ok(count)
    }

    /// Return the session's CSRF token, generating and persisting one on
    /// first use. Idempotent per session: the same token comes back for the
    /// life of the row.
    pub async fn issue_csrf_token(&self, session: &Session) -> Result<String, SessionError> {
        if let Some(token) = &session.csrf_token {
            return Ok(token.clone());
        }

        let token = generate_csrf_token()?;
        self.session_repo.set_csrf_token(&session.id, &token).await?;
        Ok(token)
    }

    /// Check a presented CSRF token against the session that issued it.
    ///
    /// Fails for a missing/expired session, a session that never issued a
    /// token, and a mismatch. The comparison runs over the full token length.
    pub async fn verify_csrf(
        &self,
        session_id: &str,
        presented: &str,
    ) -> Result<bool, SessionError> {
        let session = match self.find(session_id).await? {
            Some(s) => s,
            None => return Ok(false),
        };

        let Some(expected) = session.csrf_token else {
            return Ok(false);
        };

        Ok(constant_time_eq(expected.as_bytes(), presented.as_bytes()))
    }
}

/// Generate a fresh CSRF token: 32 random bytes, hex-encoded.
fn generate_csrf_token() -> Result<String, SessionError> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)
        .map_err(|e| anyhow::anyhow!("Failed to gather token entropy: {}", e))?;
    Ok(HEXLOWER.encode(&bytes))
}

/// Constant-time byte comparison to prevent timing attacks.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::User;

    async fn setup() -> (DynDatabasePool, SessionService, Arc<dyn UserRepository>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let session_repo = SqlxSessionRepository::boxed(pool.clone());
        let service = SessionService::new(session_repo, user_repo.clone(), 7);

        (pool, service, user_repo)
    }

    async fn create_user(repo: &Arc<dyn UserRepository>, name: &str, email: &str) -> PublicUser {
        repo.create(&User::new(name.to_string(), email.to_string(), "hash".to_string()))
            .await
            .expect("create user")
            .public()
    }

    #[tokio::test]
    async fn test_open_anonymous_session() {
        let (_pool, service, _users) = setup().await;

        let session = service.open_anonymous().await.expect("open");
        assert!(session.user_id.is_none());
        assert!(!session.is_expired());

        // Anonymous sessions never resolve to an identity
        let resolved = service.resolve(&session.id).await.expect("resolve");
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_establish_binds_into_existing_session() {
        let (_pool, service, users) = setup().await;
        let identity = create_user(&users, "alice01", "a@example.com").await;

        let anon = service.open_anonymous().await.expect("open");
        let token = service.issue_csrf_token(&anon).await.expect("token");

        let bound = service
            .establish(Some(&anon.id), &identity)
            .await
            .expect("establish");

        // Same row: the CSRF binding survives login
        assert_eq!(bound.id, anon.id);
        assert!(service.verify_csrf(&anon.id, &token).await.expect("verify"));

        let resolved = service.resolve(&anon.id).await.expect("resolve");
        assert_eq!(resolved, Some(identity));
    }

    #[tokio::test]
    async fn test_establish_without_prior_session_creates_row() {
        let (_pool, service, users) = setup().await;
        let identity = create_user(&users, "alice01", "a@example.com").await;

        let session = service.establish(None, &identity).await.expect("establish");
        let resolved = service.resolve(&session.id).await.expect("resolve");
        assert_eq!(resolved, Some(identity));
    }

    #[tokio::test]
    async fn test_serialize_deserialize_round_trip() {
        let (_pool, service, users) = setup().await;
        let identity = create_user(&users, "alice01", "a@example.com").await;

        let payload = SessionPayload::from_identity(&identity);
        let restored = service.deserialize(&payload).await.expect("deserialize");

        assert_eq!(restored, Some(identity));
    }

    #[tokio::test]
    async fn test_deserialize_deleted_account_is_invalid() {
        let (_pool, service, users) = setup().await;
        let identity = create_user(&users, "alice01", "a@example.com").await;

        let session = service.establish(None, &identity).await.expect("establish");

        users
            .delete_with_sessions(identity.id)
            .await
            .expect("delete user");

        let resolved = service.resolve(&session.id).await.expect("resolve");
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_resolve_unknown_session() {
        let (_pool, service, _users) = setup().await;
        let resolved = service.resolve("no-such-session").await.expect("resolve");
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_logs_out() {
        let (_pool, service, users) = setup().await;
        let identity = create_user(&users, "alice01", "a@example.com").await;

        let session = service.establish(None, &identity).await.expect("establish");
        service.invalidate(&session.id).await.expect("invalidate");

        let resolved = service.resolve(&session.id).await.expect("resolve");
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_user_removes_all_sessions() {
        let (_pool, service, users) = setup().await;
        let identity = create_user(&users, "alice01", "a@example.com").await;

        let s1 = service.establish(None, &identity).await.expect("establish");
        let s2 = service.establish(None, &identity).await.expect("establish");

        service.invalidate_user(identity.id).await.expect("invalidate all");

        assert!(service.resolve(&s1.id).await.expect("resolve").is_none());
        assert!(service.resolve(&s2.id).await.expect("resolve").is_none());
    }

    #[tokio::test]
    async fn test_csrf_token_is_idempotent_per_session() {
        let (_pool, service, _users) = setup().await;

        let session = service.open_anonymous().await.expect("open");
        let first = service.issue_csrf_token(&session).await.expect("token");

        let reloaded = service
            .find(&session.id)
            .await
            .expect("find")
            .expect("session");
        let second = service.issue_csrf_token(&reloaded).await.expect("token");

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_csrf_token_scoped_to_issuing_session() {
        let (_pool, service, _users) = setup().await;

        let a = service.open_anonymous().await.expect("open a");
        let b = service.open_anonymous().await.expect("open b");
        let token_a = service.issue_csrf_token(&a).await.expect("token a");
        let _token_b = service.issue_csrf_token(&b).await.expect("token b");

        assert!(service.verify_csrf(&a.id, &token_a).await.expect("verify"));
        // A token from session A must never validate under session B
        assert!(!service.verify_csrf(&b.id, &token_a).await.expect("verify"));
    }

    #[tokio::test]
    async fn test_csrf_rejects_before_any_token_issued() {
        let (_pool, service, _users) = setup().await;

        let session = service.open_anonymous().await.expect("open");
        assert!(!service
            .verify_csrf(&session.id, "anything")
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn test_csrf_rejects_without_session() {
        let (_pool, service, _users) = setup().await;
        assert!(!service
            .verify_csrf("missing-session", "anything")
            .await
            .expect("verify"));
    }

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let a = generate_csrf_token().expect("token");
        let b = generate_csrf_token().expect("token");

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
