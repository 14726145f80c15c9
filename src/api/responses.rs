//! Shared API response types

use serde::{Deserialize, Serialize};

use crate::models::AdminAccount;

/// Public view of an admin account
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminResponse {
    pub id: i64,
    pub email: String,
    pub created_at: String,
}

impl From<AdminAccount> for AdminResponse {
    fn from(account: AdminAccount) -> Self {
        Self {
            id: account.id,
            email: account.email,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Response for a successful login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub admin: AdminResponse,
    pub expires_at: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response for the health check
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}
