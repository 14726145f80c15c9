//! Password hashing module
//!
//! This module provides secure password hashing and verification using Argon2id,
//! which is the recommended variant for password hashing.
//!
//! # Security
//!
//! - Uses Argon2id variant (hybrid of Argon2i and Argon2d)
//! - Uses secure default parameters from the argon2 crate
//! - Generates random salt for each password hash from the OS RNG
//!
//! Both functions are CPU bound; async callers should run them on a blocking
//! worker (`tokio::task::spawn_blocking`).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Longest password accepted by callers before hashing, in bytes
pub const MAX_PASSWORD_BYTES: usize = 1024;

/// Error returned when a hash cannot be produced
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// The hashing primitive failed internally
    #[error("Password hashing failed: {0}")]
    HashingFailure(String),
}

/// Hash a password using Argon2id with secure defaults.
///
/// Returns the hash as a PHC string (algorithm, parameters, salt and digest),
/// so verification needs nothing else.
///
/// # Example
///
/// ```ignore
/// use pagelisting::services::password::hash_password;
///
/// let hash = hash_password("my_secure_password")?;
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailure(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a password against a stored hash.
///
/// A malformed stored hash is treated as a mismatch rather than an error, so
/// callers get a plain yes/no answer.
///
/// ```ignore
/// let hash = hash_password("my_password")?;
/// assert!(verify_password("my_password", &hash));
/// assert!(!verify_password("wrong_password", &hash));
/// ```
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Stored password hash is malformed: {}", e);
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}
