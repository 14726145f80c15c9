//! Session repository
//!
//! Persistence for admin sessions, with no business rules:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! Lookups return `Ok(None)` when no row matches; `Err` is always a store
//! failure. Deletes are idempotent. The two compound writes
//! (`replace_for_admin`, `rotate`) run inside a single transaction so a
//! concurrent reader never observes an admin with zero sessions half-way
//! through, and a cancelled call rolls back entirely.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a session row
    async fn create(&self, session: &Session) -> Result<()>;

    /// Fetch a session by token
    async fn get_by_token(&self, token: &str) -> Result<Option<Session>>;

    /// Delete a session by token
    async fn delete(&self, token: &str) -> Result<()>;

    /// Delete every session belonging to an admin
    async fn delete_by_admin(&self, admin_id: i64) -> Result<()>;

    /// Check whether a token is stored, without loading the row
    async fn exists(&self, token: &str) -> Result<bool>;

    /// Atomically drop all sessions of `session.admin_id` and insert `session`
    async fn replace_for_admin(&self, session: &Session) -> Result<()>;

    /// Atomically consume `old_token` and replace the admin's sessions with `session`.
    ///
    /// Returns `false` (and writes nothing) when `old_token` no longer exists
    /// for that admin, i.e. it was already consumed by an overlapping request.
    async fn rotate(&self, old_token: &str, session: &Session) -> Result<bool>;

    /// Delete sessions whose expiry is at or before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
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
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_session_sqlite(self.sqlite()?, session).await,
            DatabaseDriver::Mysql => create_session_mysql(self.mysql()?, session).await,
        }
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_session_sqlite(self.sqlite()?, token).await,
            DatabaseDriver::Mysql => get_session_mysql(self.mysql()?, token).await,
        }
    }

    async fn delete(&self, token: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_session_sqlite(self.sqlite()?, token).await,
            DatabaseDriver::Mysql => delete_session_mysql(self.mysql()?, token).await,
        }
    }

    async fn delete_by_admin(&self, admin_id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_by_admin_sqlite(self.sqlite()?, admin_id).await,
            DatabaseDriver::Mysql => delete_by_admin_mysql(self.mysql()?, admin_id).await,
        }
    }

    async fn exists(&self, token: &str) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => session_exists_sqlite(self.sqlite()?, token).await,
            DatabaseDriver::Mysql => session_exists_mysql(self.mysql()?, token).await,
        }
    }

    async fn replace_for_admin(&self, session: &Session) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => replace_for_admin_sqlite(self.sqlite()?, session).await,
            DatabaseDriver::Mysql => replace_for_admin_mysql(self.mysql()?, session).await,
        }
    }

    async fn rotate(&self, old_token: &str, session: &Session) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => rotate_sqlite(self.sqlite()?, old_token, session).await,
            DatabaseDriver::Mysql => rotate_mysql(self.mysql()?, old_token, session).await,
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_expired_sqlite(self.sqlite()?, now).await,
            DatabaseDriver::Mysql => delete_expired_mysql(self.mysql()?, now).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const INSERT_SESSION: &str = r#"
    INSERT INTO admin_sessions (token, admin_id, expires_at, created_at)
    VALUES (?, ?, ?, ?)
"#;

const SELECT_SESSION: &str = r#"
    SELECT token, admin_id, expires_at, created_at
    FROM admin_sessions
    WHERE token = ?
"#;

async fn create_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<()> {
    sqlx::query(INSERT_SESSION)
        .bind(&session.token)
        .bind(session.admin_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(())
}

async fn get_session_sqlite(pool: &SqlitePool, token: &str) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SESSION)
        .bind(token)
        .fetch_optional(pool)
        .await
        .context("Failed to get session by token")?;

    row.map(|row| row_to_session_sqlite(&row)).transpose()
}

async fn delete_session_sqlite(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM admin_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_by_admin_sqlite(pool: &SqlitePool, admin_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM admin_sessions WHERE admin_id = ?")
        .bind(admin_id)
        .execute(pool)
        .await
        .context("Failed to delete sessions by admin")?;

    Ok(())
}

async fn session_exists_sqlite(pool: &SqlitePool, token: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM admin_sessions WHERE token = ? LIMIT 1")
        .bind(token)
        .fetch_optional(pool)
        .await
        .context("Failed to probe session")?;

    Ok(row.is_some())
}

async fn replace_for_admin_sqlite(pool: &SqlitePool, session: &Session) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM admin_sessions WHERE admin_id = ?")
        .bind(session.admin_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete sessions by admin")?;

    sqlx::query(INSERT_SESSION)
        .bind(&session.token)
        .bind(session.admin_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create session")?;

    tx.commit().await.context("Failed to commit session replacement")?;
    Ok(())
}

async fn rotate_sqlite(pool: &SqlitePool, old_token: &str, session: &Session) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let consumed = sqlx::query("DELETE FROM admin_sessions WHERE token = ? AND admin_id = ?")
        .bind(old_token)
        .bind(session.admin_id)
        .execute(&mut *tx)
        .await
        .context("Failed to consume session")?
        .rows_affected();

    if consumed == 0 {
        tx.rollback().await.context("Failed to roll back rotation")?;
        return Ok(false);
    }

    sqlx::query("DELETE FROM admin_sessions WHERE admin_id = ?")
        .bind(session.admin_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete sessions by admin")?;

    sqlx::query(INSERT_SESSION)
        .bind(&session.token)
        .bind(session.admin_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create rotated session")?;

    tx.commit().await.context("Failed to commit session rotation")?;
    Ok(true)
}

async fn delete_expired_sqlite(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM admin_sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    Ok(Session {
        token: row.try_get("token")?,
        admin_id: row.try_get("admin_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &Session) -> Result<()> {
    sqlx::query(INSERT_SESSION)
        .bind(&session.token)
        .bind(session.admin_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(())
}

async fn get_session_mysql(pool: &MySqlPool, token: &str) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SESSION)
        .bind(token)
        .fetch_optional(pool)
        .await
        .context("Failed to get session by token")?;

    row.map(|row| row_to_session_mysql(&row)).transpose()
}

async fn delete_session_mysql(pool: &MySqlPool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM admin_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_by_admin_mysql(pool: &MySqlPool, admin_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM admin_sessions WHERE admin_id = ?")
        .bind(admin_id)
        .execute(pool)
        .await
        .context("Failed to delete sessions by admin")?;

    Ok(())
}

async fn session_exists_mysql(pool: &MySqlPool, token: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM admin_sessions WHERE token = ? LIMIT 1")
        .bind(token)
        .fetch_optional(pool)
        .await
        .context("Failed to probe session")?;

    Ok(row.is_some())
}

async fn replace_for_admin_mysql(pool: &MySqlPool, session: &Session) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM admin_sessions WHERE admin_id = ?")
        .bind(session.admin_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete sessions by admin")?;

    sqlx::query(INSERT_SESSION)
        .bind(&session.token)
        .bind(session.admin_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create session")?;

    tx.commit().await.context("Failed to commit session replacement")?;
    Ok(())
}

async fn rotate_mysql(pool: &MySqlPool, old_token: &str, session: &Session) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let consumed = sqlx::query("DELETE FROM admin_sessions WHERE token = ? AND admin_id = ?")
        .bind(old_token)
        .bind(session.admin_id)
        .execute(&mut *tx)
        .await
        .context("Failed to consume session")?
        .rows_affected();

    if consumed == 0 {
        tx.rollback().await.context("Failed to roll back rotation")?;
        return Ok(false);
    }

    sqlx::query("DELETE FROM admin_sessions WHERE admin_id = ?")
        .bind(session.admin_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete sessions by admin")?;

    sqlx::query(INSERT_SESSION)
        .bind(&session.token)
        .bind(session.admin_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create rotated session")?;

    tx.commit().await.context("Failed to commit session rotation")?;
    Ok(true)
}

async fn delete_expired_mysql(pool: &MySqlPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM admin_sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    Ok(Session {
        token: row.try_get("token")?,
        admin_id: row.try_get("admin_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Duration;

    pub(crate) async fn setup_test_repo() -> (DynDatabasePool, SqlxSessionRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxSessionRepository::new(pool.clone());
        (pool, repo)
    }

    // Sessions reference admin_accounts, so every test needs owning rows.
    pub(crate) async fn create_test_admin(pool: &DynDatabasePool, id: i64) {
        sqlx::query("INSERT INTO admin_accounts (id, email, password_hash) VALUES (?, ?, ?)")
            .bind(id)
            .bind(format!("admin{}@example.com", id))
            .bind("hash")
            .execute(pool.as_sqlite().unwrap())
            .await
            .expect("Failed to create test admin");
    }

    pub(crate) async fn count_sessions_for(pool: &DynDatabasePool, admin_id: i64) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM admin_sessions WHERE admin_id = ?")
            .bind(admin_id)
            .fetch_one(pool.as_sqlite().unwrap())
            .await
            .expect("Failed to count sessions")
            .get("n")
    }

    /// Real repository whose lookups of one token keep returning a snapshot
    /// taken earlier, as if the read had happened just before an overlapping
    /// request rotated that token away. Writes go to the real store.
    pub(crate) struct StaleReadRepository {
        pub(crate) inner: SqlxSessionRepository,
        pub(crate) snapshot: Session,
    }

    #[async_trait]
    impl SessionRepository for StaleReadRepository {
        async fn create(&self, session: &Session) -> Result<()> {
            self.inner.create(session).await
        }
        async fn get_by_token(&self, token: &str) -> Result<Option<Session>> {
            if token == self.snapshot.token {
                return Ok(Some(self.snapshot.clone()));
            }
            self.inner.get_by_token(token).await
        }
        async fn delete(&self, token: &str) -> Result<()> {
            self.inner.delete(token).await
        }
        async fn delete_by_admin(&self, admin_id: i64) -> Result<()> {
            self.inner.delete_by_admin(admin_id).await
        }
        async fn exists(&self, token: &str) -> Result<bool> {
            self.inner.exists(token).await
        }
        async fn replace_for_admin(&self, session: &Session) -> Result<()> {
            self.inner.replace_for_admin(session).await
        }
        async fn rotate(&self, old_token: &str, session: &Session) -> Result<bool> {
            self.inner.rotate(old_token, session).await
        }
        async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
            self.inner.delete_expired(now).await
        }
    }

    fn session_for(admin_id: i64, minutes: i64) -> Session {
        Session::issue(admin_id, Duration::minutes(minutes))
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;

        let session = session_for(1, 30);
        repo.create(&session).await.expect("Failed to create session");

        let found = repo
            .get_by_token(&session.token)
            .await
            .expect("Failed to get session")
            .expect("Session not found");

        assert_eq!(found.token, session.token);
        assert_eq!(found.admin_id, 1);
        assert_eq!(found.expires_at.timestamp(), session.expires_at.timestamp());
    }

    #[tokio::test]
    async fn test_get_unknown_token_returns_none() {
        let (_pool, repo) = setup_test_repo().await;

        let found = repo
            .get_by_token("nonexistent-token")
            .await
            .expect("Lookup should not error");

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_token_is_rejected() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;

        let session = session_for(1, 30);
        repo.create(&session).await.expect("Failed to create session");

        assert!(repo.create(&session).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;

        let session = session_for(1, 30);
        repo.create(&session).await.unwrap();

        repo.delete(&session.token).await.expect("First delete failed");
        repo.delete(&session.token).await.expect("Second delete failed");
        repo.delete("never-existed").await.expect("Unknown delete failed");

        assert!(repo.get_by_token(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_by_admin_keeps_other_admins() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;
        create_test_admin(&pool, 2).await;

        let first = session_for(1, 30);
        let second = session_for(1, 30);
        let other = session_for(2, 30);
        repo.create(&first).await.unwrap();
        repo.create(&second).await.unwrap();
        repo.create(&other).await.unwrap();

        repo.delete_by_admin(1).await.expect("Failed to delete by admin");
        repo.delete_by_admin(1).await.expect("Repeat delete should succeed");

        assert!(repo.get_by_token(&first.token).await.unwrap().is_none());
        assert!(repo.get_by_token(&second.token).await.unwrap().is_none());
        assert!(repo.get_by_token(&other.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exists() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;

        let session = session_for(1, 30);
        assert!(!repo.exists(&session.token).await.unwrap());

        repo.create(&session).await.unwrap();
        assert!(repo.exists(&session.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_for_admin_leaves_single_session() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;

        repo.create(&session_for(1, 30)).await.unwrap();
        repo.create(&session_for(1, 30)).await.unwrap();

        let replacement = session_for(1, 30);
        repo.replace_for_admin(&replacement)
            .await
            .expect("Failed to replace sessions");

        assert_eq!(count_sessions_for(&pool, 1).await, 1);
        assert!(repo.exists(&replacement.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_for_admin_rolls_back_on_failure() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;
        create_test_admin(&pool, 2).await;

        let existing = session_for(1, 30);
        let foreign = session_for(2, 30);
        repo.create(&existing).await.unwrap();
        repo.create(&foreign).await.unwrap();

        // The insert collides with admin 2's token after admin 1's rows
        // were already deleted inside the transaction.
        let colliding = Session {
            token: foreign.token.clone(),
            ..session_for(1, 30)
        };
        assert!(repo.replace_for_admin(&colliding).await.is_err());

        assert!(repo.exists(&existing.token).await.unwrap());
        assert_eq!(count_sessions_for(&pool, 1).await, 1);
    }

    #[tokio::test]
    async fn test_rotate_consumes_old_token() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;

        let old = session_for(1, 30);
        repo.create(&old).await.unwrap();

        let new = session_for(1, 30);
        let rotated = repo.rotate(&old.token, &new).await.expect("Rotate failed");

        assert!(rotated);
        assert!(!repo.exists(&old.token).await.unwrap());
        assert!(repo.exists(&new.token).await.unwrap());
        assert_eq!(count_sessions_for(&pool, 1).await, 1);
    }

    #[tokio::test]
    async fn test_rotate_with_consumed_token_writes_nothing() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;

        let current = session_for(1, 30);
        repo.create(&current).await.unwrap();

        let new = session_for(1, 30);
        let rotated = repo
            .rotate("already-consumed", &new)
            .await
            .expect("Rotate should not error");

        assert!(!rotated);
        assert!(repo.exists(&current.token).await.unwrap());
        assert!(!repo.exists(&new.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_rejects_token_of_other_admin() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;
        create_test_admin(&pool, 2).await;

        let foreign = session_for(2, 30);
        repo.create(&foreign).await.unwrap();

        let new = session_for(1, 30);
        assert!(!repo.rotate(&foreign.token, &new).await.unwrap());
        assert!(repo.exists(&foreign.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_expired_sessions() {
        let (pool, repo) = setup_test_repo().await;
        create_test_admin(&pool, 1).await;
        create_test_admin(&pool, 2).await;

        let expired = session_for(1, -5);
        let live = session_for(2, 30);
        repo.create(&expired).await.unwrap();
        repo.create(&live).await.unwrap();

        let deleted = repo
            .delete_expired(Utc::now())
            .await
            .expect("Failed to delete expired sessions");

        assert_eq!(deleted, 1);
        assert!(!repo.exists(&expired.token).await.unwrap());
        assert!(repo.exists(&live.token).await.unwrap());
    }
}
