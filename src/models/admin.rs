//! Admin account model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered administrator.
///
/// There is a single admin role; holding an account is the permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAccount {
    /// Unique identifier
    pub id: i64,
    /// Email address (unique, stored lower-cased)
    pub email: String,
    /// Password hash (argon2, PHC format)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl AdminAccount {
    /// Build an account that has not been persisted yet.
    ///
    /// The password must already be hashed; see `services::password::hash_password`.
    pub fn new(email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Will be set by the database
            email,
            password_hash,
            created_at: now,
            updated_at: now,
        }
    }
}
