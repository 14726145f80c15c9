//! Services layer - Business logic
//!
//! Services are responsible for:
//! - Implementing business rules on top of the repositories
//! - Handling validation and error cases
//! - Deciding what is logged and what reaches the caller

pub mod admin;
pub mod password;
pub mod session;

pub use admin::{AdminAccountService, AdminServiceError, Credentials};
pub use password::{hash_password, verify_password, PasswordError, MAX_PASSWORD_BYTES};
pub use session::{Authentication, SessionError, SessionManager, SessionState};
