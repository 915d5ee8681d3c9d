//! SQLite state store.

use super::{parse_kind, DeadLetter, StateStore};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use connector_types::{IdempotencyKey, InstanceId, Watermark};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based state store.
///
/// Uses WAL mode; every write is a single statement, so a crash never leaves
/// a half-written watermark behind.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> StoreResult<Self> {
        let path = path
            .to_str()
            .ok_or_else(|| StoreError::Corrupt(format!("non UTF-8 path {}", path.display())))?;
        let options = SqliteConnectOptions::from_str(path)
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:").map_err(StoreError::Database)?;

        // A single connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS watermarks (
                instance_id TEXT PRIMARY KEY,
                watermark INTEGER NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS deliveries (
                instance_id TEXT NOT NULL,
                delivery_key TEXT NOT NULL,
                watermark INTEGER NOT NULL,
                PRIMARY KEY (instance_id, delivery_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                instance_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                source_id TEXT NOT NULL,
                watermark INTEGER NOT NULL,
                kind TEXT NOT NULL,
                reason TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (instance_id, idempotency_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS exhausted (
                instance_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                cycles INTEGER NOT NULL,
                PRIMARY KEY (instance_id, idempotency_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS counters (
                instance_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (instance_id, name)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_deliveries_watermark ON deliveries(instance_id, watermark)",
            "CREATE INDEX IF NOT EXISTS idx_dead_letters_recorded ON dead_letters(instance_id, recorded_at)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        }
        Ok(())
    }
}

// Watermarks span the whole u64 range. Flipping the top bit maps them onto
// i64 in the same order, so `watermark <= ?` comparisons stay correct.
const SIGN_BIT: u64 = 1 << 63;

fn to_watermark(value: i64) -> Watermark {
    Watermark::new((value as u64) ^ SIGN_BIT)
}

fn to_sql(watermark: Watermark) -> i64 {
    (watermark.value() ^ SIGN_BIT) as i64
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_watermark(&self, instance: &InstanceId) -> StoreResult<Option<Watermark>> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT watermark FROM watermarks WHERE instance_id = ?1")
                .bind(instance.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        Ok(value.map(to_watermark))
    }

    async fn save_watermark(
        &self,
        instance: &InstanceId,
        watermark: Watermark,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO watermarks (instance_id, watermark, updated_at)
            VALUES (?1, ?2, strftime('%s', 'now'))
            ON CONFLICT(instance_id) DO UPDATE SET
                watermark = excluded.watermark,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instance.as_str())
        .bind(to_sql(watermark))
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn record_delivery(
        &self,
        instance: &InstanceId,
        delivery_key: &str,
        watermark: Watermark,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deliveries (instance_id, delivery_key, watermark)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(instance_id, delivery_key) DO NOTHING
            "#,
        )
        .bind(instance.as_str())
        .bind(delivery_key)
        .bind(to_sql(watermark))
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn is_delivered(&self, instance: &InstanceId, delivery_key: &str) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM deliveries WHERE instance_id = ?1 AND delivery_key = ?2",
        )
        .bind(instance.as_str())
        .bind(delivery_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(found.is_some())
    }

    async fn prune_deliveries(&self, instance: &InstanceId, up_to: Watermark) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM deliveries WHERE instance_id = ?1 AND watermark <= ?2")
            .bind(instance.as_str())
            .bind(to_sql(up_to))
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(result.rows_affected())
    }

    async fn record_dead_letter(
        &self,
        instance: &InstanceId,
        letter: &DeadLetter,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters
                (instance_id, idempotency_key, source_id, watermark, kind, reason, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(instance_id, idempotency_key) DO UPDATE SET
                source_id = excluded.source_id,
                watermark = excluded.watermark,
                kind = excluded.kind,
                reason = excluded.reason,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(instance.as_str())
        .bind(letter.idempotency_key.as_str())
        .bind(&letter.source_id)
        .bind(to_sql(letter.watermark))
        .bind(letter.kind.to_string())
        .bind(&letter.reason)
        .bind(letter.recorded_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn dead_letters(
        &self,
        instance: &InstanceId,
        limit: usize,
    ) -> StoreResult<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT idempotency_key, source_id, watermark, kind, reason, recorded_at
            FROM dead_letters
            WHERE instance_id = ?1
            ORDER BY recorded_at DESC
            LIMIT ?2
            "#,
        )
        .bind(instance.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    async fn increment_exhausted(
        &self,
        instance: &InstanceId,
        key: &IdempotencyKey,
    ) -> StoreResult<u32> {
        let cycles: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO exhausted (instance_id, idempotency_key, cycles)
            VALUES (?1, ?2, 1)
            ON CONFLICT(instance_id, idempotency_key) DO UPDATE SET cycles = cycles + 1
            RETURNING cycles
            "#,
        )
        .bind(instance.as_str())
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        u32::try_from(cycles).map_err(|_| StoreError::Corrupt(format!("exhausted count {cycles}")))
    }

    async fn clear_exhausted(&self, instance: &InstanceId, key: &IdempotencyKey) -> StoreResult<()> {
        sqlx::query("DELETE FROM exhausted WHERE instance_id = ?1 AND idempotency_key = ?2")
            .bind(instance.as_str())
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn get_counter(&self, instance: &InstanceId, name: &str) -> StoreResult<Option<u64>> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT value FROM counters WHERE instance_id = ?1 AND name = ?2")
                .bind(instance.as_str())
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        value
            .map(|v| {
                u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("counter {name} = {v}")))
            })
            .transpose()
    }

    async fn put_counter(&self, instance: &InstanceId, name: &str, value: u64) -> StoreResult<()> {
        let value = i64::try_from(value)
            .map_err(|_| StoreError::Corrupt(format!("counter {name} out of range")))?;
        sqlx::query(
            r#"
            INSERT INTO counters (instance_id, name, value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(instance_id, name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(instance.as_str())
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    idempotency_key: String,
    source_id: String,
    watermark: i64,
    kind: String,
    reason: String,
    recorded_at: i64,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = StoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        Ok(DeadLetter {
            idempotency_key: IdempotencyKey::from_hex(&row.idempotency_key).ok_or_else(|| {
                StoreError::Corrupt(format!("invalid idempotency key {}", row.idempotency_key))
            })?,
            source_id: row.source_id,
            watermark: to_watermark(row.watermark),
            kind: parse_kind(&row.kind)?,
            reason: row.reason,
            recorded_at: DateTime::<Utc>::from_timestamp_millis(row.recorded_at).ok_or_else(
                || StoreError::Corrupt(format!("invalid timestamp {}", row.recorded_at)),
            )?,
        })
    }
}
