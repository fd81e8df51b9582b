//! Block table trait and the sqlx-backed implementation.

use crate::error::StoreResult;
use async_trait::async_trait;
use dcd_core::config::DbConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// One row of the `files` table.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct BlockRow {
    pub entryname: String,
    pub block: i64,
    pub data: Vec<u8>,
    pub hash: String,
}

/// The row operations the core consumes from the replicated database.
///
/// The concrete client (driver, replication, consistency handling) is a
/// collaborator behind this trait; [`RepoStore`](crate::RepoStore) only
/// ever touches the table through these six calls.
#[async_trait]
pub trait BlockTable: Send + Sync {
    /// Create the backing schema if absent.
    async fn init(&self) -> StoreResult<()>;

    /// Fetch a single row by primary key.
    async fn get_row(&self, entryname: &str, block: i64) -> StoreResult<Option<BlockRow>>;

    /// Fetch up to `limit` rows with `block > after_block`, ordered by block.
    async fn scan_blocks(
        &self,
        entryname: &str,
        after_block: i64,
        limit: i64,
    ) -> StoreResult<Vec<BlockRow>>;

    /// Insert or overwrite a row.
    async fn upsert_row(
        &self,
        entryname: &str,
        block: i64,
        data: &[u8],
        hash: &str,
    ) -> StoreResult<()>;

    /// Delete every block of an entry.
    async fn delete_entry(&self, entryname: &str) -> StoreResult<()>;

    /// Delete a single row.
    async fn delete_block(&self, entryname: &str, block: i64) -> StoreResult<()>;
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    entryname TEXT NOT NULL,
    block     INTEGER NOT NULL,
    data      BLOB NOT NULL,
    hash      TEXT NOT NULL,
    PRIMARY KEY (entryname, block)
);
"#;

/// SQLite-backed block table.
pub struct SqliteTable {
    pool: Pool<Sqlite>,
}

impl SqliteTable {
    /// Open (creating if missing) the database at the configured endpoint.
    pub async fn new(config: &DbConfig) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", config.endpoint))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under load.
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect_with(opts)
            .await?;

        tracing::warn!(
            consistency = %config.consistency,
            "SQLite backend is single-node; the configured consistency level is advisory only"
        );

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl BlockTable for SqliteTable {
    async fn init(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_row(&self, entryname: &str, block: i64) -> StoreResult<Option<BlockRow>> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT entryname, block, data, hash FROM files WHERE entryname = ? AND block = ?",
        )
        .bind(entryname)
        .bind(block)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn scan_blocks(
        &self,
        entryname: &str,
        after_block: i64,
        limit: i64,
    ) -> StoreResult<Vec<BlockRow>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            "SELECT entryname, block, data, hash FROM files \
             WHERE entryname = ? AND block > ? ORDER BY block LIMIT ?",
        )
        .bind(entryname)
        .bind(after_block)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_row(
        &self,
        entryname: &str,
        block: i64,
        data: &[u8],
        hash: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO files (entryname, block, data, hash) VALUES (?, ?, ?, ?) \
             ON CONFLICT(entryname, block) DO UPDATE SET data = excluded.data, hash = excluded.hash",
        )
        .bind(entryname)
        .bind(block)
        .bind(data)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_entry(&self, entryname: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM files WHERE entryname = ?")
            .bind(entryname)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_block(&self, entryname: &str, block: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM files WHERE entryname = ? AND block = ?")
            .bind(entryname)
            .bind(block)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
