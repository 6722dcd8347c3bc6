//! Persistence with SQLite-backed key-value blobs.
//!
//! The tenant registry and deployment tracker persist their records through
//! the [`BlobStore`] trait so a process restart never loses an acknowledged
//! mutation. [`SqliteStore`] is the default binding; any store satisfying the
//! trait is acceptable.

use crate::error::{Result, StackdError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument};

/// Key-value blob persistence collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob under a key, replacing any existing value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch the blob stored under a key, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the blob stored under a key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all keys starting with a prefix.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed blob store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SqliteStore with an in-memory database (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Create a new SqliteStore with a database at the specified path.
    #[instrument(skip(db_path))]
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("Initializing blob store at {:?}", db_path);

        // Create parent directory if it doesn't exist (but not for :memory:)
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StackdError::InvalidConfig {
                        reason: format!("Failed to create directory {}: {}", parent.display(), e),
                    }
                })?;
            }
        }

        let mut options =
            SqliteConnectOptions::from_str(db_path.to_str().ok_or_else(|| {
                StackdError::InvalidConfig { reason: "Invalid database path".to_string() }
            })?)
            .map_err(|e| StackdError::Store(e.to_string()))?;

        options = options.create_if_missing(true).log_statements(tracing::log::LevelFilter::Debug);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StackdError::Store(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        info!("Blob store initialized successfully");
        Ok(store)
    }

    /// Get a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self))]
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StackdError::Store(e.to_string()))?;

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StackdError::Store(e.to_string()))?;

        if current.unwrap_or(0) >= SCHEMA_VERSION {
            return Ok(());
        }

        info!("Migrating blob store schema to version {}", SCHEMA_VERSION);

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StackdError::Store(e.to_string()))?;

        sqlx::query("DELETE FROM schema_version")
            .execute(&self.pool)
            .await
            .map_err(|e| StackdError::Store(e.to_string()))?;

        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await
            .map_err(|e| StackdError::Store(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for SqliteStore {
    #[instrument(skip(self, value), fields(key = %key))]
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let updated_at = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO blobs (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("stackd_store_errors_total", "operation" => "put").increment(1);
            StackdError::Store(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                metrics::counter!("stackd_store_errors_total", "operation" => "get").increment(1);
                StackdError::Store(e.to_string())
            })?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM blobs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                metrics::counter!("stackd_store_errors_total", "operation" => "delete")
                    .increment(1);
                StackdError::Store(e.to_string())
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", prefix);
        let rows = sqlx::query("SELECT key FROM blobs WHERE key LIKE ? ORDER BY key")
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StackdError::Store(e.to_string()))?;

        Ok(rows.into_iter().map(|r| r.get::<String, _>("key")).collect())
    }
}
