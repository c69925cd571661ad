//! Claim-based job queue over Postgres.
//!
//! One table per job type, one algorithm. Every operation is a single SQL
//! statement: claims serialise at the database through `FOR UPDATE SKIP
//! LOCKED`, so two workers can never take the same row and idle workers
//! never block each other.

use std::time::Duration;

use sqlx::PgPool;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTable {
    ArenaSimulations,
    Live20Runs,
}

impl JobTable {
    pub fn table_name(self) -> &'static str {
        match self {
            Self::ArenaSimulations => "arena_simulations",
            Self::Live20Runs => "live20_runs",
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    table: JobTable,
    worker_id: String,
    stale_threshold: Duration,
}

impl JobQueue {
    pub fn new(pool: PgPool, table: JobTable, worker_type: &str, stale_threshold: Duration) -> Self {
        Self {
            pool,
            table,
            worker_id: make_worker_id(worker_type),
            stale_threshold,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn table(&self) -> JobTable {
        self.table
    }

    /// Atomically claim the oldest pending job. Returns None when no work
    /// is available.
    pub async fn claim_next(&self) -> Result<Option<i64>> {
        let t = self.table.table_name();
        let id: Option<i64> = sqlx::query_scalar(&format!(
            "UPDATE {t} SET status = 'running', worker_id = $1, \
             claimed_at = now(), heartbeat_at = now() \
             WHERE id = (SELECT id FROM {t} WHERE status = 'pending' \
                         ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED) \
             RETURNING id"
        ))
        .bind(&self.worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn update_heartbeat(&self, job_id: i64) -> Result<()> {
        let t = self.table.table_name();
        sqlx::query(&format!(
            "UPDATE {t} SET heartbeat_at = now() WHERE id = $1 AND status = 'running'"
        ))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cooperative cancellation probe.
    pub async fn is_cancelled(&self, job_id: i64) -> Result<bool> {
        let t = self.table.table_name();
        let status: Option<String> =
            sqlx::query_scalar(&format!("SELECT status FROM {t} WHERE id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(status.as_deref() == Some("cancelled"))
    }

    /// Guarded on status='running' so a cancelled row is never overwritten.
    pub async fn mark_completed(&self, job_id: i64) -> Result<()> {
        let t = self.table.table_name();
        sqlx::query(&format!(
            "UPDATE {t} SET status = 'completed', worker_id = NULL, claimed_at = NULL \
             WHERE id = $1 AND status = 'running'"
        ))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retryable failure: back to pending while retries remain, otherwise
    /// terminally failed. One statement, no read-modify-write.
    pub async fn mark_failed(&self, job_id: i64, error: &str) -> Result<()> {
        let t = self.table.table_name();
        sqlx::query(&format!(
            "UPDATE {t} SET \
             status = CASE WHEN retry_count < max_retries THEN 'pending' ELSE 'failed' END, \
             retry_count = CASE WHEN retry_count < max_retries THEN retry_count + 1 ELSE retry_count END, \
             worker_id = NULL, claimed_at = NULL, last_error = $2 \
             WHERE id = $1 AND status = 'running'"
        ))
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return jobs whose worker stopped heartbeating to the pending pool.
    /// Idempotent and safe under concurrent invocation.
    pub async fn reset_stale_jobs(&self) -> Result<u64> {
        let t = self.table.table_name();
        let result = sqlx::query(&format!(
            "UPDATE {t} SET status = 'pending', worker_id = NULL, claimed_at = NULL \
             WHERE status = 'running' AND heartbeat_at < now() - make_interval(secs => $1)"
        ))
        .bind(self.stale_threshold.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Startup one-shot: any running row belongs to a previous process of
    /// this single-instance deployment and is by definition orphaned.
    pub async fn reset_stranded_jobs(&self) -> Result<u64> {
        let t = self.table.table_name();
        let result = sqlx::query(&format!(
            "UPDATE {t} SET status = 'pending', worker_id = NULL, claimed_at = NULL \
             WHERE status = 'running'"
        ))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn make_worker_id(worker_type: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{worker_type}-{}", &suffix[..8])
}
