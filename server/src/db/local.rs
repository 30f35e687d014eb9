//! Reads from the local (authoritative) records table.

use chrono::{DateTime, Utc};
use driftwatch_engine::{LocalRecord, Window};
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::store::LocalStore;

/// A local record row from the database.
#[derive(Debug)]
pub struct StoredLocalRecord {
    pub id: i64,
    pub payload: serde_json::Value,
    pub modified_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredLocalRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredLocalRecord {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            modified_at: row.try_get("modified_at")?,
        })
    }
}

impl From<StoredLocalRecord> for LocalRecord {
    fn from(row: StoredLocalRecord) -> Self {
        LocalRecord::new(row.id, row.payload, row.modified_at)
    }
}

/// Local store backed by a Postgres table.
#[derive(Debug, Clone)]
pub struct PgLocalStore {
    pool: PgPool,
    range_sql: String,
}

impl PgLocalStore {
    pub fn new(pool: PgPool, table: &str) -> Self {
        let range_sql = format!(
            r#"
            SELECT id, payload, modified_at
            FROM {table}
            WHERE modified_at >= $1 AND modified_at < $2
            ORDER BY modified_at ASC, id ASC
            "#
        );
        Self { pool, range_sql }
    }
}

impl LocalStore for PgLocalStore {
    async fn range(&self, window: &Window) -> Result<Vec<LocalRecord>> {
        let rows = sqlx::query_as::<_, StoredLocalRecord>(&self.range_sql)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(LocalRecord::from).collect())
    }
}
