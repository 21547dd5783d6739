//! Credential validation
//!
//! Checks an email/password pair against the user store and reduces a match
//! to the public identity. Invalid credentials are a `None`, never an error:
//! the caller cannot tell "no such account" from "wrong password", and the
//! miss path still pays a full hash comparison so response timing does not
//! reveal which one it was. Only store failures surface as errors.

use std::sync::Arc;

use crate::db::repositories::UserRepository;
use crate::models::PublicUser;
use crate::services::password::{verify_password, DUMMY_HASH};

/// Error type for credential validation
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The user store could not be reached
    #[error("user store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

/// Validates login credentials against the user store.
pub struct CredentialValidator {
    user_repo: Arc<dyn UserRepository>,
}

impl CredentialValidator {
    /// Create a new validator over the given user store
    pub fn new(user_repo: Arc<dyn UserRepository>) -> Self {
        Self { user_repo }
    }

    /// Validate an email/password pair.
    ///
    /// Returns the public identity on a match, `None` for any invalid
    /// combination. The email lookup is an exact, case-sensitive match.
    pub async fn validate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<PublicUser>, AuthError> {
        let user = self.user_repo.get_by_email(email).await?;

        match user {
            Some(user) => {
                if verify_password(password, &user.password_hash) {
                    Ok(Some(user.public()))
                } else {
                    Ok(None)
                }
            }
            None => {
                // Burn the hash-compare cost the hit path would have paid
                let _ = verify_password(password, DUMMY_HASH);
                Ok(None)
            }
        }
    }
}
