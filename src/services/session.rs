//! Session lifecycle service
//!
//! Owns the rules around admin sessions:
//! - `login` replaces whatever sessions an admin had with a single new one
//! - `authenticate` validates a presented token and rotates it on every use
//! - `logout` deletes a token and never fails
//!
//! Authentication fails closed: an unknown token, an expired token, a token
//! already consumed by an overlapping request and a store failure all leave
//! the request unauthenticated. Store failures are reported separately as
//! [`Authentication::Unavailable`] so the host can tell "not logged in" from
//! "cannot check right now".

use crate::config::SessionConfig;
use crate::db::repositories::SessionRepository;
use crate::models::Session;
use anyhow::Result;
use chrono::{Duration, Utc};
use std::future::Future;
use std::sync::Arc;

/// Default sliding idle timeout in minutes
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: i64 = 30;

/// Default upper bound for one store call
pub const DEFAULT_STORE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The new session could not be persisted
    #[error("Failed to create session: {0}")]
    CreationFailed(#[from] anyhow::Error),
}

/// Where a request stands with respect to its session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session cookie was presented
    NoCookie,
    /// The cookie named a live session, which has been rotated
    Valid,
    /// The cookie named a session that is unknown, expired or unverifiable
    ExpiredOrUnknown,
}

/// Outcome of authenticating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// No token presented
    Anonymous,
    /// Token unknown or expired
    Rejected,
    /// Token was live when looked up but an overlapping request rotated it
    /// first. The client already holds the replacement.
    Superseded,
    /// The store could not be consulted; treated as unauthenticated
    Unavailable,
    /// Token was live; `session` is its replacement and must be sent back
    Authenticated { session: Session },
}

impl Authentication {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn state(&self) -> SessionState {
        match self {
            Self::Anonymous => SessionState::NoCookie,
            Self::Authenticated { .. } => SessionState::Valid,
            Self::Rejected | Self::Superseded | Self::Unavailable => {
                SessionState::ExpiredOrUnknown
            }
        }
    }

    /// The rotated session, if authentication succeeded
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated { session } => Some(session),
            _ => None,
        }
    }

    /// The authenticated admin, if any
    pub fn admin_id(&self) -> Option<i64> {
        self.session().map(|session| session.admin_id)
    }
}

/// Session lifecycle manager
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    idle_timeout: Duration,
    store_timeout: std::time::Duration,
}

impl SessionManager {
    /// Create a manager with the default 30 minute idle timeout
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self::with_idle_timeout(sessions, Duration::minutes(DEFAULT_IDLE_TIMEOUT_MINUTES))
    }

    /// Create a manager with a custom idle timeout
    pub fn with_idle_timeout(sessions: Arc<dyn SessionRepository>, idle_timeout: Duration) -> Self {
        Self {
            sessions,
            idle_timeout,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Create a manager from the `session` configuration section
    pub fn from_config(sessions: Arc<dyn SessionRepository>, config: &SessionConfig) -> Self {
        Self::with_idle_timeout(sessions, Duration::minutes(config.idle_timeout_minutes))
            .with_store_timeout(std::time::Duration::from_millis(config.store_timeout_ms))
    }

    /// Bound every store call by `timeout`
    pub fn with_store_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Authenticate a request by its session token and rotate the token.
    ///
    /// On success the presented token is consumed; the caller must hand the
    /// token of the returned session back to the client.
    pub async fn authenticate(&self, token: Option<&str>) -> Authentication {
        let token = match token.filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => return Authentication::Anonymous,
        };

        let session = match self.bounded("lookup", self.sessions.get_by_token(token)).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!("Unknown session token presented");
                return Authentication::Rejected;
            }
            Err(e) => {
                tracing::error!("Session lookup failed: {:#}", e);
                return Authentication::Unavailable;
            }
        };

        if session.is_expired_at(Utc::now()) {
            tracing::debug!(admin_id = session.admin_id, "Session expired");
            if let Err(e) = self.bounded("cleanup", self.sessions.delete(&session.token)).await {
                tracing::warn!("Failed to delete expired session: {:#}", e);
            }
            return Authentication::Rejected;
        }

        let renewed = Session::issue(session.admin_id, self.idle_timeout);
        match self
            .bounded("rotation", self.sessions.rotate(&session.token, &renewed))
            .await
        {
            Ok(true) => {
                tracing::debug!(admin_id = renewed.admin_id, "Session rotated");
                Authentication::Authenticated { session: renewed }
            }
            Ok(false) => {
                tracing::debug!(
                    admin_id = session.admin_id,
                    "Session token was consumed by a concurrent request"
                );
                Authentication::Superseded
            }
            Err(e) => {
                tracing::error!("Session rotation failed: {:#}", e);
                Authentication::Unavailable
            }
        }
    }

    /// Start a new session for an admin whose credentials were verified.
    ///
    /// Every existing session of the admin is invalidated in the same
    /// transaction, so at most one session stays live.
    pub async fn login(&self, admin_id: i64) -> Result<Session, SessionError> {
        let session = Session::issue(admin_id, self.idle_timeout);

        self.bounded("login", self.sessions.replace_for_admin(&session))
            .await?;

        tracing::info!(admin_id, "Admin session created");
        Ok(session)
    }

    /// End a session. Never fails; the caller clears the cookie regardless.
    pub async fn logout(&self, token: Option<&str>) {
        let token = match token.filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => return,
        };

        match self.bounded("logout probe", self.sessions.exists(token)).await {
            Ok(false) => {
                tracing::debug!("Logout with unknown session token");
                return;
            }
            Ok(true) => {}
            Err(e) => tracing::warn!("Session probe failed during logout: {:#}", e),
        }

        match self.bounded("logout", self.sessions.delete(token)).await {
            Ok(()) => tracing::info!("Admin session ended"),
            Err(e) => tracing::warn!("Failed to delete session on logout: {:#}", e),
        }
    }

    /// Delete every expired session row. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let removed = self
            .bounded("purge", self.sessions.delete_expired(Utc::now()))
            .await?;

        if removed > 0 {
            tracing::info!("Purged {} expired session(s)", removed);
        }
        Ok(removed)
    }

    /// Run a store call under the configured timeout.
    ///
    /// A call that times out is dropped, which rolls back any transaction it
    /// had open.
    async fn bounded<T>(&self, op: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Session store timed out after {:?} during {}",
                self.store_timeout,
                op
            )),
        }
    }
}
