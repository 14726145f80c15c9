//! Session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side admin session, referenced by the `session_id` cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unguessable token
    pub token: String,
    /// Owning admin account
    pub admin_id: i64,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Issue a fresh session for `admin_id` that stays live for `ttl`
    pub fn issue(admin_id: i64, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token: Uuid::new_v4().to_string(),
            admin_id,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    /// A session is live only while `expires_at` lies strictly in the future
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
