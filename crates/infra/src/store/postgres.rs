//! Postgres-backed job store.
//!
//! One row per job in the `jobs` table, keyed by the job id. `put` is an upsert and
//! `put_if_status` a single `UPDATE ... WHERE status = $expected`, so every state
//! transition is a single-row write and reads issued afterwards on the same pool
//! observe it.
//!
//! ## Error Mapping
//!
//! | SQLx error | StoreError |
//! |------------|------------|
//! | any driver/pool/network error | `Storage` |
//! | row with an unknown status, priority class or kind | `Corrupt` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use taskq_core::{JobId, JobKind, JobRecord, JobStatus, PriorityClass};

use super::{JobStats, JobStore, StoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              UUID PRIMARY KEY,
    kind            TEXT NOT NULL,
    priority_class  TEXT NOT NULL,
    payload         JSONB NOT NULL,
    status          TEXT NOT NULL,
    attempt_count   INTEGER NOT NULL DEFAULT 0,
    created_at      TIMESTAMPTZ NOT NULL,
    started_at      TIMESTAMPTZ,
    finished_at     TIMESTAMPTZ,
    last_error      TEXT
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS jobs_created_at_idx ON jobs (created_at DESC)";

const SELECT_COLUMNS: &str = "id, kind, priority_class, payload, status, attempt_count, \
     created_at, started_at, finished_at, last_error";

/// Postgres-backed job store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`; clone freely.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` and create the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the `jobs` table and its index (idempotent).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        sqlx::query(CREATE_INDEX)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn put(&self, job: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, kind, priority_class, payload, status, attempt_count,
                created_at, started_at, finished_at, last_error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                attempt_count = EXCLUDED.attempt_count,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.kind.as_str())
        .bind(job.priority_class.as_str())
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.attempt_count as i32)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.last_error.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put", e))?;

        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status, expected = %expected), err)]
    async fn put_if_status(&self, job: &JobRecord, expected: JobStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2,
                attempt_count = $3,
                started_at = $4,
                finished_at = $5,
                last_error = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.attempt_count as i32)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.last_error.as_deref())
        .bind(expected.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_if_status", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| decode_row(&row)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_all", e))?;

        rows.iter().map(decode_row).collect()
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            match status.parse::<JobStatus>() {
                Ok(status) => stats.add_count(status, n.max(0) as usize),
                Err(e) => tracing::warn!(status = %status, error = %e, "skipping unknown status in stats"),
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<JobRecord, StoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(|e| map_sqlx_error("decode", e))?;
    let id = JobId::from_uuid(id);
    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let kind: String = row.try_get("kind").map_err(|e| map_sqlx_error("decode", e))?;
    let priority_class: String = row
        .try_get("priority_class")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let status: String = row.try_get("status").map_err(|e| map_sqlx_error("decode", e))?;
    let attempt_count: i32 = row
        .try_get("attempt_count")
        .map_err(|e| map_sqlx_error("decode", e))?;

    Ok(JobRecord {
        id,
        kind: JobKind::new(kind).map_err(|e| corrupt(e.to_string()))?,
        priority_class: priority_class
            .parse::<PriorityClass>()
            .map_err(|e| corrupt(e.to_string()))?,
        payload: row.try_get("payload").map_err(|e| map_sqlx_error("decode", e))?,
        status: status.parse::<JobStatus>().map_err(|e| corrupt(e.to_string()))?,
        attempt_count: u32::try_from(attempt_count)
            .map_err(|_| corrupt(format!("negative attempt_count {attempt_count}")))?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
        started_at: row.try_get("started_at").map_err(|e| map_sqlx_error("decode", e))?,
        finished_at: row.try_get("finished_at").map_err(|e| map_sqlx_error("decode", e))?,
        last_error: row.try_get("last_error").map_err(|e| map_sqlx_error("decode", e))?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
