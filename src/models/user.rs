//! User model
//!
//! Defines the account record and the two projections that may leave the
//! store boundary: the public identity (safe for any caller) and the private
//! identity (disclosed only to the account's own owner).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account record as persisted in the user store.
///
/// The password hash never leaves the store boundary: it is skipped during
/// serialization and handlers only ever respond with [`PublicUser`] or
/// [`PrivateUser`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Display name
    pub name: String,
    /// Email address (unique)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new User with the given parameters.
    ///
    /// The password must already be hashed; use
    /// `services::password::hash_password()`.
    pub fn new(name: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Assigned by the database
            name,
            email,
            password_hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// Public projection: id and name only.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Private projection: includes the email address. Owner-only.
    pub fn private(&self) -> PrivateUser {
        PrivateUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// The subset of account fields safe to disclose to any requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
}

/// The subset of account fields disclosed only to the account's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateUser {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// Input for creating a new account (before password hashing)
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub name: String,
    pub email: String,
    /// Plaintext password (will be hashed)
    pub password: String,
}

/// Partial input for updating an account
#[derive(Debug, Clone, Default)]
pub struct UpdateUserInput {
    pub name: Option<String>,
    pub email: Option<String>,
    /// New plaintext password (will be hashed)
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_new() {
        let user = User::new(
            "alice01".to_string(),
            "a@example.com".to_string(),
            "hashed".to_string(),
        );

        assert_eq!(user.id, 0);
        assert_eq!(user.name, "alice01");
        assert_eq!(user.email, "a@example.com");
    }

    #[test]
    fn test_public_projection_omits_email() {
        let mut user = User::new(
            "alice01".to_string(),
            "a@example.com".to_string(),
            "hashed".to_string(),
        );
        user.id = 7;

        let public = user.public();
        assert_eq!(public, PublicUser { id: 7, name: "alice01".to_string() });

        let json = serde_json::to_value(&public).expect("serialize");
        assert!(json.get("email").is_none());
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_private_projection_includes_email() {
        let mut user = User::new(
            "alice01".to_string(),
            "a@example.com".to_string(),
            "hashed".to_string(),
        );
        user.id = 7;

        let private = user.private();
        assert_eq!(private.email, "a@example.com");

        let json = serde_json::to_value(&private).expect("serialize");
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_user_serialization_skips_password_hash() {
        let user = User::new(
            "alice01".to_string(),
            "a@example.com".to_string(),
            "super-secret-hash".to_string(),
        );

        let json = serde_json::to_string(&user).expect("serialize");
        assert!(!json.contains("super-secret-hash"));
    }
}
