use sqlx::Row;
use tracing::{debug, info};

use crate::persist::types::{PersistError, PersistResult, SnapshotData, WalOp};
use crate::persist::wal::{op_from_json, op_to_json};
use crate::persist::{SnapshotStore, WalStore, SNAPSHOT_SCHEMA_VERSION};

/// Snapshot store keyed by event name; the newest row wins on load.
pub struct PostgresSnapshotStore {
    pool: sqlx::PgPool,
    event: String,
}

impl PostgresSnapshotStore {
    pub async fn new(database_url: &str, event: &str) -> PersistResult<Self> {
        let pool = sqlx::PgPool::connect(database_url)
            .await
            .map_err(|_| PersistError::IoFailure)?;
        ensure_schema(&pool).await?;
        Ok(Self { pool, event: event.to_string() })
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn load_snapshot(&self, event: &str) -> PersistResult<Option<SnapshotData>> {
        let row = sqlx::query(
            r#"
            SELECT schema_version, wal_high_watermark, snapshot_json
            FROM snapshots
            WHERE event = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(event)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| PersistError::IoFailure)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let schema_version: i32 = row.get("schema_version");
        if schema_version != SNAPSHOT_SCHEMA_VERSION as i32 {
            return Err(PersistError::FormatMismatch);
        }

        let snapshot_json: String = row.get("snapshot_json");
        let mut snapshot: SnapshotData =
            serde_json::from_str(&snapshot_json).map_err(|_| PersistError::FormatMismatch)?;
        // the column is authoritative for the watermark
        snapshot.wal_high_watermark = row.get("wal_high_watermark");

        debug!(event, watermark = snapshot.wal_high_watermark, "snapshot loaded");
        Ok(Some(snapshot))
    }

    async fn save_snapshot(&mut self, snapshot: &SnapshotData) -> PersistResult<()> {
        // stamp the snapshot with the WAL position it covers
        let watermark: i64 = sqlx::query(
            "SELECT COALESCE(MAX(id), 0) FROM wal WHERE event = $1",
        )
        .bind(&self.event)
        .fetch_one(&self.pool)
        .await
        .map_err(|_| PersistError::IoFailure)?
        .get(0);

        let mut stamped = snapshot.clone();
        stamped.wal_high_watermark = watermark;
        let snapshot_json =
            serde_json::to_string(&stamped).map_err(|_| PersistError::SerializationFailure)?;

        sqlx::query(
            r#"
            INSERT INTO snapshots (event, schema_version, wal_high_watermark, snapshot_json)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&self.event)
        .bind(SNAPSHOT_SCHEMA_VERSION as i32)
        .bind(watermark)
        .bind(&snapshot_json)
        .execute(&self.pool)
        .await
        .map_err(|_| PersistError::IoFailure)?;

        info!(event = %self.event, watermark, "snapshot saved");
        Ok(())
    }
}

/// Append-only op log keyed by event name.
pub struct PostgresWalStore {
    pool: sqlx::PgPool,
    event: String,
}

impl PostgresWalStore {
    pub async fn new(database_url: &str, event: &str) -> PersistResult<Self> {
        let pool = sqlx::PgPool::connect(database_url)
            .await
            .map_err(|_| PersistError::IoFailure)?;
        ensure_schema(&pool).await?;
        Ok(Self { pool, event: event.to_string() })
    }
}

#[async_trait::async_trait]
impl WalStore for PostgresWalStore {
    async fn append_op(&mut self, op: &WalOp) -> PersistResult<()> {
        let op_json = op_to_json(op)?;
        sqlx::query("INSERT INTO wal (event, op_json) VALUES ($1, $2)")
            .bind(&self.event)
            .bind(&op_json)
            .execute(&self.pool)
            .await
            .map_err(|_| PersistError::IoFailure)?;
        Ok(())
    }

    async fn relay_ops(&self, after: i64) -> PersistResult<Vec<(i64, WalOp)>> {
        let rows = sqlx::query(
            r#"
            SELECT id, op_json
            FROM wal
            WHERE event = $1 AND id > $2
            ORDER BY id ASC
            "#,
        )
        .bind(&self.event)
        .bind(after)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| PersistError::IoFailure)?;

        let mut ops = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let op_json: String = row.get("op_json");
            ops.push((id, op_from_json(&op_json).map_err(|_| PersistError::CorruptWalRecord)?));
        }
        Ok(ops)
    }
}

async fn ensure_schema(pool: &sqlx::PgPool) -> PersistResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id BIGSERIAL PRIMARY KEY,
            event TEXT NOT NULL,
            schema_version INT NOT NULL,
            wal_high_watermark BIGINT NOT NULL,
            snapshot_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|_| PersistError::IoFailure)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS wal (
            id BIGSERIAL PRIMARY KEY,
            event TEXT NOT NULL,
            op_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|_| PersistError::IoFailure)?;

    Ok(())
}
