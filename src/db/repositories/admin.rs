//! Admin account repository
//!
//! This module provides:
//! - `AdminAccountRepository` trait defining the interface for account data access
//! - `SqlxAdminAccountRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::AdminAccount;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Admin account repository trait
#[async_trait]
pub trait AdminAccountRepository: Send + Sync {
    /// Create a new account, returning it with its assigned ID
    async fn create(&self, account: &AdminAccount) -> Result<AdminAccount>;

    /// Get account by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<AdminAccount>>;

    /// Get account by email
    async fn get_by_email(&self, email: &str) -> Result<Option<AdminAccount>>;

    /// Check whether an account with this email exists
    async fn exists_by_email(&self, email: &str) -> Result<bool>;
}

/// SQLx-based admin account repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxAdminAccountRepository {
    pool: DynDatabasePool,
}

impl SqlxAdminAccountRepository {
    /// Create a new SQLx admin account repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AdminAccountRepository> {
        Arc::new(Self::new(pool))
    }

    fn sqlite(&self) -> Result<&SqlitePool> {
        self.pool
            .as_sqlite()
            .context("SQLite driver selected but no SQLite pool available")
    }

    fn mysql(&self) -> Result<&MySqlPool> {
        self.pool
            .as_mysql()
            .context("MySQL driver selected but no MySQL pool available")
    }
}

#[async_trait]
impl AdminAccountRepository for SqlxAdminAccountRepository {
    async fn create(&self, account: &AdminAccount) -> Result<AdminAccount> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_account_sqlite(self.sqlite()?, account).await,
            DatabaseDriver::Mysql => create_account_mysql(self.mysql()?, account).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<AdminAccount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_account_by_id_sqlite(self.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_account_by_id_mysql(self.mysql()?, id).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<AdminAccount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_account_by_email_sqlite(self.sqlite()?, email).await,
            DatabaseDriver::Mysql => get_account_by_email_mysql(self.mysql()?, email).await,
        }
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => account_exists_sqlite(self.sqlite()?, email).await,
            DatabaseDriver::Mysql => account_exists_mysql(self.mysql()?, email).await,
        }
    }
}

/// Whether a repository error was caused by a unique constraint violation.
///
/// Used to turn a lost registration race into a business outcome.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    })
}

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO admin_accounts (email, password_hash, created_at, updated_at)
    VALUES (?, ?, ?, ?)
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_account_sqlite(pool: &SqlitePool, account: &AdminAccount) -> Result<AdminAccount> {
    let now = Utc::now();

    let result = sqlx::query(INSERT_ACCOUNT)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create admin account")?;

    Ok(AdminAccount {
        id: result.last_insert_rowid(),
        email: account.email.clone(),
        password_hash: account.password_hash.clone(),
        created_at: now,
        updated_at: now,
    })
}

async fn get_account_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<AdminAccount>> {
    let row = sqlx::query(
        r#"
        SELECT id, email, password_hash, created_at, updated_at
        FROM admin_accounts
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get admin account by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_account_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn get_account_by_email_sqlite(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<AdminAccount>> {
    let row = sqlx::query(
        r#"
        SELECT id, email, password_hash, created_at, updated_at
        FROM admin_accounts
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get admin account by email")?;

    match row {
        Some(row) => Ok(Some(row_to_account_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn account_exists_sqlite(pool: &SqlitePool, email: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM admin_accounts WHERE email = ? LIMIT 1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to check admin email")?;

    Ok(row.is_some())
}

fn row_to_account_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<AdminAccount> {
    Ok(AdminAccount {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_account_mysql(pool: &MySqlPool, account: &AdminAccount) -> Result<AdminAccount> {
    let now = Utc::now();

    let result = sqlx::query(INSERT_ACCOUNT)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create admin account")?;

    Ok(AdminAccount {
        id: result.last_insert_id() as i64,
        email: account.email.clone(),
        password_hash: account.password_hash.clone(),
        created_at: now,
        updated_at: now,
    })
}

async fn get_account_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<AdminAccount>> {
    let row = sqlx::query(
        r#"
        SELECT id, email, password_hash, created_at, updated_at
        FROM admin_accounts
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get admin account by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_account_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn get_account_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<AdminAccount>> {
    let row = sqlx::query(
        r#"
        SELECT id, email, password_hash, created_at, updated_at
        FROM admin_accounts
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get admin account by email")?;

    match row {
        Some(row) => Ok(Some(row_to_account_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn account_exists_mysql(pool: &MySqlPool, email: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM admin_accounts WHERE email = ? LIMIT 1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to check admin email")?;

    Ok(row.is_some())
}

fn row_to_account_mysql(row: &sqlx::mysql::MySqlRow) -> Result<AdminAccount> {
    Ok(AdminAccount {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
