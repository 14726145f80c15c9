//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles persistence for a single entity and holds no
//! business rules.

pub mod admin;
pub mod session;

pub use admin::{is_unique_violation, AdminAccountRepository, SqlxAdminAccountRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
