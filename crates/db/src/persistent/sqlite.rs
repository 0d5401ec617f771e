//! SQLite implementation of the persistent storage layer.

use std::{future::Future, str::FromStr};

use async_trait::async_trait;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{debug, warn};

use super::{config::DbConfig, errors::StorageError};
use crate::{errors::DbResult, storage::Storage};

/// Schema migrations shipped with the crate.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// [`Storage`] backed by a single `kv_store` table.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    config: DbConfig,
}

impl SqliteStorage {
    /// Wraps an existing pool. The schema must already be migrated, see [`Self::migrate`].
    pub fn new(pool: SqlitePool, config: DbConfig) -> Self {
        Self { pool, config }
    }

    /// Opens (creating it if needed) the database at `url` and runs pending migrations.
    pub async fn connect(url: &str, config: DbConfig) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StorageError::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(StorageError::from)?;

        let storage = Self::new(pool, config);
        storage.migrate().await?;

        debug!(%url, "connected to sqlite storage");

        Ok(storage)
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> DbResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(())
    }

    /// Runs `op`, retrying while the database reports it is busy.
    async fn with_retries<T, F, Fut>(&self, action: &'static str, mut op: F) -> DbResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, sqlx::Error>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) && attempt < self.config.max_retry_count() => {
                    attempt += 1;
                    warn!(%action, %attempt, %err, "database busy, retrying");
                    tokio::time::sleep(self.config.backoff_period()).await;
                }
                Err(err) => return Err(StorageError::from(err).into()),
            }
        }
    }
}

fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        // SQLITE_BUSY and SQLITE_LOCKED
        sqlx::Error::Database(db_err) => matches!(db_err.code().as_deref(), Some("5" | "6")),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        let pool = &self.pool;
        self.with_retries("get", move || {
            sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv_store WHERE key = ?1")
                .bind(key)
                .fetch_optional(pool)
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> DbResult<()> {
        let pool = &self.pool;
        let value = value.as_slice();
        self.with_retries("put", move || {
            sqlx::query(
                "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(pool)
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<()> {
        let pool = &self.pool;
        self.with_retries("delete", move || {
            sqlx::query("DELETE FROM kv_store WHERE key = ?1")
                .bind(key)
                .execute(pool)
        })
        .await?;

        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> DbResult<bool> {
        let pool = &self.pool;
        let new = new.as_deref();

        // One conditional statement per branch, no transaction spans statements.
        let result = match (expected, new) {
            (None, None) => return Ok(self.get(key).await?.is_none()),
            (None, Some(new)) => {
                self.with_retries("insert_if_absent", move || {
                    sqlx::query(
                        "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
                            ON CONFLICT(key) DO NOTHING",
                    )
                    .bind(key)
                    .bind(new)
                    .execute(pool)
                })
                .await?
            }
            (Some(expected), Some(new)) => {
                self.with_retries("swap_if_unchanged", move || {
                    sqlx::query("UPDATE kv_store SET value = ?3 WHERE key = ?1 AND value = ?2")
                        .bind(key)
                        .bind(expected)
                        .bind(new)
                        .execute(pool)
                })
                .await?
            }
            (Some(expected), None) => {
                self.with_retries("delete_if_unchanged", move || {
                    sqlx::query("DELETE FROM kv_store WHERE key = ?1 AND value = ?2")
                        .bind(key)
                        .bind(expected)
                        .execute(pool)
                })
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, prefix: &str) -> DbResult<Vec<String>> {
        let pool = &self.pool;
        self.with_retries("list", move || {
            sqlx::query_scalar::<_, String>(
                "SELECT key FROM kv_store
                    WHERE substr(key, 1, length(?1)) = ?1
                    ORDER BY key",
            )
            .bind(prefix)
            .fetch_all(pool)
        })
        .await
    }
}
