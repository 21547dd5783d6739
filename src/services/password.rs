//! Password hashing module
//!
//! Secure password hashing and verification using Argon2id with a random
//! per-password salt. Verification is deliberately total: a malformed or
//! truncated stored hash counts as a failed match rather than an error, so a
//! corrupt row can never be confused with an infrastructure failure.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// A syntactically valid Argon2id hash that matches no password.
///
/// Verified against when a login's email lookup misses, so the miss path
/// burns the same hash-compare time as the hit path.
pub(crate) const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Hash a password using Argon2id with the crate's secure defaults.
///
/// Returns the hash in PHC string format (algorithm, parameters, salt and
/// hash). The salt is random, so hashing the same password twice produces
/// different strings.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(password_hash.to_string())
}

/// Verify a password against a stored PHC hash string.
///
/// Returns `true` only when the password matches. Malformed hashes and every
/// other verification failure return `false`.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}
