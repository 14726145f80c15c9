//! Admin account service
//!
//! Implements business logic for admin accounts:
//! - Registration (never starts a session)
//! - Login credential verification
//! - Lookup of the current admin
//!
//! Password hashing and verification are CPU bound and run on tokio's
//! blocking pool.

use crate::db::repositories::{is_unique_violation, AdminAccountRepository};
use crate::models::AdminAccount;
use crate::services::password::{hash_password, verify_password, PasswordError, MAX_PASSWORD_BYTES};
use anyhow::Context;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::sync::Arc;

/// Longest accepted email address, matching the column width
const MAX_EMAIL_LENGTH: usize = 255;

/// Well-formed Argon2id digest with default cost parameters that matches no
/// password. Used when the dummy hash cannot be computed at startup.
const FALLBACK_DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$cGFnZWxpc3Rpbmctbm9uZQ$YgxWqidwIIjlFqSkspt4lc9hAhrj7cRJXB74pBLv94c";

/// Hash verified against when the email is unknown, so that a miss costs as
/// much as a wrong password.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| {
    hash_password("pagelisting-unknown-account").unwrap_or_else(|e| {
        tracing::error!("Failed to compute dummy password hash, using fallback: {}", e);
        FALLBACK_DUMMY_HASH.to_string()
    })
});

/// Error types for admin account operations
#[derive(Debug, thiserror::Error)]
pub enum AdminServiceError {
    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Email already registered
    #[error("Email '{0}' is already registered")]
    EmailTaken(String),

    /// Unknown email or wrong password; deliberately indistinguishable
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Password could not be hashed
    #[error(transparent)]
    HashingError(#[from] PasswordError),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Email and password pair submitted for registration or login
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Emails compare case-insensitively and ignore surrounding whitespace
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Admin account service
pub struct AdminAccountService {
    accounts: Arc<dyn AdminAccountRepository>,
}

impl AdminAccountService {
    /// Create a new admin account service
    pub fn new(accounts: Arc<dyn AdminAccountRepository>) -> Self {
        Self { accounts }
    }

    /// Register a new admin account.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if the email or password is unacceptable
    /// - `EmailTaken` if the email is already registered, including when a
    ///   concurrent registration wins the race
    /// - `HashingError` if the password could not be hashed
    /// - `InternalError` for database errors
    pub async fn register(&self, input: Credentials) -> Result<AdminAccount, AdminServiceError> {
        let email = normalize_email(&input.email);
        validate_email(&email)?;
        validate_password(&input.password)?;

        if self
            .accounts
            .exists_by_email(&email)
            .await
            .context("Failed to check email")?
        {
            return Err(AdminServiceError::EmailTaken(email));
        }

        let password = input.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .context("Password hashing task failed")??;

        let account = AdminAccount::new(email.clone(), password_hash);
        let created = match self.accounts.create(&account).await {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => return Err(AdminServiceError::EmailTaken(email)),
            Err(e) => return Err(e.context("Failed to create admin account").into()),
        };

        tracing::info!(admin_id = created.id, "Admin account registered");
        Ok(created)
    }

    /// Check login credentials and return the admin's ID.
    ///
    /// An unknown email and a wrong password both yield `InvalidCredentials`
    /// after the same amount of hashing work.
    pub async fn verify_login(&self, input: Credentials) -> Result<i64, AdminServiceError> {
        if input.password.len() > MAX_PASSWORD_BYTES {
            return Err(AdminServiceError::InvalidCredentials);
        }

        let email = normalize_email(&input.email);
        let account = self
            .accounts
            .get_by_email(&email)
            .await
            .context("Failed to look up admin account")?;

        let (admin_id, stored_hash) = match account {
            Some(account) => (Some(account.id), account.password_hash),
            None => (None, DUMMY_HASH.clone()),
        };

        let password = input.password;
        let password_valid =
            tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
                .await
                .context("Password verification task failed")?;

        match admin_id {
            Some(id) if password_valid => Ok(id),
            _ => {
                tracing::debug!("Rejected admin login attempt");
                Err(AdminServiceError::InvalidCredentials)
            }
        }
    }

    /// Get an admin account by ID
    pub async fn get_by_id(&self, id: i64) -> Result<Option<AdminAccount>, AdminServiceError> {
        let account = self
            .accounts
            .get_by_id(id)
            .await
            .context("Failed to get admin account by ID")?;

        Ok(account)
    }
}

fn validate_email(email: &str) -> Result<(), AdminServiceError> {
    if email.is_empty() {
        return Err(AdminServiceError::ValidationError(
            "Email cannot be empty".to_string(),
        ));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(AdminServiceError::ValidationError(format!(
            "Email cannot exceed {} characters",
            MAX_EMAIL_LENGTH
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AdminServiceError::ValidationError(
            "Invalid email format".to_string(),
        )),
    }
}

fn validate_password(password: &str) -> Result<(), AdminServiceError> {
    if password.is_empty() {
        return Err(AdminServiceError::ValidationError(
            "Password cannot be empty".to_string(),
        ));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AdminServiceError::ValidationError(format!(
            "Password cannot exceed {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }
    Ok(())
}
