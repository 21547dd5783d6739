//! User service
//!
//! Ownership-scoped account operations:
//! - account creation with email uniqueness
//! - public listing with pagination
//! - public/private lookups
//! - self-service update and delete, keyed strictly by the id the
//!   authorization guard resolved from the session, never by an id taken
//!   from the request
//!
//! The uniqueness pre-checks here are best-effort; the store's unique index
//! is the hard constraint, and a raced insert still comes back as
//! `DuplicateEmail`.

use std::sync::Arc;

use serde::Serialize;

use crate::db::repositories::{DuplicateEmailViolation, UserRepository};
use crate::models::{CreateUserInput, PrivateUser, PublicUser, UpdateUserInput, User};
use crate::services::password::hash_password;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Create/update would violate email uniqueness
    #[error("the email address is already registered")]
    DuplicateEmail,

    /// Referenced account does not exist
    #[error("user not found")]
    NotFound,

    /// Invalid input
    #[error("{0}")]
    Validation(String),

    /// Infrastructure failure talking to persistence
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// One page of the public user listing
#[derive(Debug, Serialize)]
pub struct UserPage {
    /// Total number of accounts
    pub count: i64,
    /// The requested page, newest accounts first
    pub data: Vec<PublicUser>,
}

/// User service for account management
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
}

impl UserService {
    /// Create a new user service
    pub fn new(user_repo: Arc<dyn UserRepository>) -> Self {
        Self { user_repo }
    }

    /// Register a new account.
    ///
    /// The password is hashed before anything is persisted. Returns the full
    /// record; callers expose only its public projection.
    pub async fn create(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        validate_name(&input.name)?;
        validate_email(&input.email)?;
        validate_password(&input.password)?;

        if self.user_repo.get_by_email(&input.email).await?.is_some() {
            return Err(UserServiceError::DuplicateEmail);
        }

        let password_hash = hash_password(&input.password)?;
        let user = User::new(input.name, input.email, password_hash);

        self.user_repo
            .create(&user)
            .await
            .map_err(map_duplicate_email)
    }

    /// List accounts, newest first.
    ///
    /// `page` is 1-indexed; out-of-range values fall back to the defaults the
    /// listing endpoint documents.
    pub async fn paginate(&self, page: i64, limit: i64) -> Result<UserPage, UserServiceError> {
        let page = if page < 1 { 1 } else { page };
        let limit = if limit < 1 { 10 } else { limit };

        let (users, count) = self.user_repo.list(page, limit).await?;

        Ok(UserPage {
            count,
            data: users.iter().map(User::public).collect(),
        })
    }

    /// Public identity of an account.
    pub async fn find_public(&self, id: i64) -> Result<PublicUser, UserServiceError> {
        let user = self
            .user_repo
            .get_by_id(id)
            .await?
            .ok_or(UserServiceError::NotFound)?;
        Ok(user.public())
    }

    /// Private identity of an account. Only ever called with the id the
    /// authorization guard attached for the owner's own requests.
    pub async fn find_private(&self, id: i64) -> Result<PrivateUser, UserServiceError> {
        let user = self
            .user_repo
            .get_by_id(id)
            .await?
            .ok_or(UserServiceError::NotFound)?;
        Ok(user.private())
    }

    /// Apply a partial update to the caller's own account.
    ///
    /// Changing the email to an address owned by a different account fails
    /// with `DuplicateEmail`; re-submitting the account's current address is
    /// a no-op rather than an error.
    pub async fn update_self(
        &self,
        id: i64,
        input: UpdateUserInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self
            .user_repo
            .get_by_id(id)
            .await?
            .ok_or(UserServiceError::NotFound)?;

        if let Some(name) = input.name {
            validate_name(&name)?;
            user.name = name;
        }

        if let Some(email) = input.email {
            validate_email(&email)?;
            if let Some(owner) = self.user_repo.get_by_email(&email).await? {
                if owner.id != id {
                    return Err(UserServiceError::DuplicateEmail);
                }
            }
            user.email = email;
        }

        if let Some(password) = input.password {
            validate_password(&password)?;
            user.password_hash = hash_password(&password)?;
        }

        self.user_repo
            .update(&user)
            .await
            .map_err(map_duplicate_email)
    }

    /// Delete the caller's own account.
    ///
    /// The account row and every one of its sessions go in a single
    /// transaction, so no session can outlive the account it names.
    pub async fn delete_self(&self, id: i64) -> Result<(), UserServiceError> {
        if self.user_repo.get_by_id(id).await?.is_none() {
            return Err(UserServiceError::NotFound);
        }

        self.user_repo.delete_with_sessions(id).await?;
        Ok(())
    }
}

/// Lift the repository's unique-index marker into the service taxonomy.
fn map_duplicate_email(e: anyhow::Error) -> UserServiceError {
    if e.is::<DuplicateEmailViolation>() {
        UserServiceError::DuplicateEmail
    } else {
        UserServiceError::Store(e)
    }
}

fn validate_name(name: &str) -> Result<(), UserServiceError> {
    let len = name.chars().count();
    if !(4..=32).contains(&len) {
        return Err(UserServiceError::Validation(
            "Name must be 4 to 32 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), UserServiceError> {
    let valid = email.len() <= 255
        && matches!(email.split_once('@'), Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'));
    if !valid {
        return Err(UserServiceError::Validation(
            "Invalid email address".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), UserServiceError> {
    if !(8..=32).contains(&password.len()) {
        return Err(UserServiceError::Validation(
            "Password must be 8 to 32 characters".to_string(),
        ));
    }
    if !password.chars().all(|c| c.is_ascii_graphic()) {
        return Err(UserServiceError::Validation(
            "Password may only contain printable ASCII characters".to_string(),
        ));
    }
    Ok(())
}
