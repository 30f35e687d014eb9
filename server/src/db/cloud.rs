//! Reads and repair writes against the cloud records table.

use chrono::{DateTime, Utc};
use driftwatch_engine::{CloudRecord, RecordId};
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::store::CloudStore;

/// A cloud record row from the database.
#[derive(Debug)]
pub struct StoredCloudRecord {
    pub id: i64,
    pub payload: serde_json::Value,
    pub modified_at: DateTime<Utc>,
    pub revision: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredCloudRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredCloudRecord {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            modified_at: row.try_get("modified_at")?,
            revision: row.try_get("revision")?,
        })
    }
}

impl From<StoredCloudRecord> for CloudRecord {
    fn from(row: StoredCloudRecord) -> Self {
        CloudRecord::new(row.id, row.payload, row.modified_at, row.revision)
    }
}

/// Cloud store backed by a Postgres table.
///
/// Bulk reads may go to a read replica; reloads and repairs always use the
/// primary so they observe the latest replicated state.
#[derive(Debug, Clone)]
pub struct PgCloudStore {
    primary: PgPool,
    replica: PgPool,
    select_sql: String,
    upsert_sql: String,
}

impl PgCloudStore {
    pub fn new(primary: PgPool, replica: Option<PgPool>, table: &str) -> Self {
        let select_sql = format!(
            r#"
            SELECT id, payload, modified_at, revision
            FROM {table}
            WHERE id = ANY($1)
            "#
        );
        let upsert_sql = format!(
            r#"
            INSERT INTO {table} (id, payload, modified_at, revision)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (id) DO UPDATE SET
                payload = EXCLUDED.payload,
                modified_at = EXCLUDED.modified_at,
                revision = {table}.revision + 1
            "#
        );
        Self {
            replica: replica.unwrap_or_else(|| primary.clone()),
            primary,
            select_sql,
            upsert_sql,
        }
    }

    async fn select(&self, pool: &PgPool, ids: &[RecordId]) -> Result<Vec<CloudRecord>> {
        let rows = sqlx::query_as::<_, StoredCloudRecord>(&self.select_sql)
            .bind(ids)
            .fetch_all(pool)
            .await?;

        Ok(rows.into_iter().map(CloudRecord::from).collect())
    }
}

impl CloudStore for PgCloudStore {
    async fn batch_get(&self, ids: &[RecordId]) -> Result<Vec<CloudRecord>> {
        self.select(&self.replica, ids).await
    }

    async fn get(&self, ids: &[RecordId]) -> Result<Vec<CloudRecord>> {
        self.select(&self.primary, ids).await
    }

    async fn put(&self, record: &CloudRecord, _original: Option<&CloudRecord>) -> Result<()> {
        // The replica may lag the primary, so the write is not guarded by
        // the revision that was read.
        sqlx::query(&self.upsert_sql)
            .bind(record.id)
            .bind(&record.payload)
            .bind(record.modified_at)
            .execute(&self.primary)
            .await?;
        Ok(())
    }
}
