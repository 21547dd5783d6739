//! Session model
//!
//! A session row links an opaque, server-generated id (carried by the client
//! in a signed cookie) to an authenticated identity and its expiry. Sessions
//! start out anonymous so a CSRF token can be bound before login; a
//! successful login binds the identity into the existing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PublicUser;

/// Session record in the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session id (uuid)
    pub id: String,
    /// Owning account, None while the session is anonymous
    pub user_id: Option<i64>,
    /// Serialized identity name, kept alongside the id
    pub user_name: Option<String>,
    /// Anti-forgery token bound to this session, issued on demand
    pub csrf_token: Option<String>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// The serialized identity carried by this session, if it has one.
    pub fn payload(&self) -> Option<SessionPayload> {
        match (self.user_id, &self.user_name) {
            (Some(user_id), Some(user_name)) => Some(SessionPayload {
                user_id,
                user_name: user_name.clone(),
            }),
            _ => None,
        }
    }
}

/// The minimal durable form of an authenticated identity.
///
/// Kept deliberately small and stable: changing this shape invalidates every
/// existing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub user_id: i64,
    pub user_name: String,
}

impl SessionPayload {
    /// Reduce an authenticated identity to its durable session form.
    pub fn from_identity(identity: &PublicUser) -> Self {
        Self {
            user_id: identity.id,
            user_name: identity.name.clone(),
        }
    }

    /// The identity this payload stands for, as last serialized.
    pub fn identity(&self) -> PublicUser {
        PublicUser {
            id: self.user_id,
            name: self.user_name.clone(),
        }
    }
}
