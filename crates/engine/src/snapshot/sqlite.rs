//! SQLite-backed snapshot storage.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::{CartSnapshot, SnapshotStorage};

/// Snapshot records in a `cart_snapshots` table, one row per key.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStorage {
    pool: SqlitePool,
}

impl SqliteSnapshotStorage {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create snapshot directory at {parent:?}"))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open snapshot database at {path:?}"))?;

        Self::from_pool(pool).await
    }

    /// Connect with a sqlx URL (e.g. `sqlite::memory:`).
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        // A single connection keeps `sqlite::memory:` pointing at one database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .with_context(|| format!("failed to connect snapshot database {url}"))?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cart_snapshots (
                key       TEXT PRIMARY KEY,
                data      TEXT NOT NULL,
                saved_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create cart_snapshots table")?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl SnapshotStorage for SqliteSnapshotStorage {
    async fn read(&self, key: &str) -> anyhow::Result<Option<CartSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT data, saved_at
            FROM cart_snapshots
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch cart snapshot")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: String = row.try_get("data")?;
        let saved_at: DateTime<Utc> = row.try_get("saved_at")?;

        let mut snapshot: CartSnapshot =
            serde_json::from_str(&data).context("failed to deserialize cart snapshot")?;

        // The column is authoritative for expiry checks.
        snapshot.saved_at = saved_at;

        Ok(Some(snapshot))
    }

    async fn write(&self, key: &str, snapshot: &CartSnapshot) -> anyhow::Result<()> {
        let payload =
            serde_json::to_string(snapshot).context("failed to serialize cart snapshot")?;

        sqlx::query(
            r#"
            INSERT INTO cart_snapshots (key, data, saved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key)
            DO UPDATE SET
                data = excluded.data,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(key)
        .bind(&payload)
        .bind(snapshot.saved_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert cart snapshot")?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cart_snapshots WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("failed to delete cart snapshot")?;

        Ok(())
    }
}
