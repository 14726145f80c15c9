//! Data models
//!
//! Database entities of the authentication core: admin accounts and their
//! server-side sessions.

mod admin;
mod session;

pub use admin::AdminAccount;
pub use session::Session;
