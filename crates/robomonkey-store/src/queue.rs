//! PostgreSQL-backed durable job queue
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! receive the same row, and a partial unique index keeps at most one
//! pending/claimed job per `(repo, job_type, dedup_key)`.

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{StoreError, StoreErrorExt, StoreOperation, StoreResult};
use crate::models::{
    DaemonInstance, EnqueueOutcome, JobRecord, JobStatus, JobType, NewJob,
};
use crate::traits::JobQueue;

/// Base delay for the retry backoff schedule, in seconds.
/// Attempt n reschedules after `60 * 2^(n-1)` seconds.
const RETRY_BASE_SECS: i64 = 60;

/// PostgreSQL job queue over the control schema
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> StoreResult<JobRecord> {
    let job_type_str: String = row.get("job_type");
    let status_str: String = row.get("status");

    let job_type: JobType = job_type_str.parse().map_err(|reason| StoreError::Invalid {
        what: "job_type".into(),
        value: job_type_str.clone(),
        reason,
    })?;
    let status: JobStatus = status_str.parse().map_err(|reason| StoreError::Invalid {
        what: "job_status".into(),
        value: status_str.clone(),
        reason,
    })?;

    Ok(JobRecord {
        id: row.get("id"),
        repo_name: row.get("repo_name"),
        schema_name: row.get("schema_name"),
        job_type,
        payload: row.get("payload"),
        priority: row.get("priority"),
        status,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        run_after: row.get("run_after"),
        claimed_at: row.get("claimed_at"),
        claimed_by: row.get("claimed_by"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
        error_detail: row.get("error_detail"),
        dedup_key: row.get("dedup_key"),
        created_at: row.get("created_at"),
    })
}

/// Backoff delay in seconds before retry number `attempts`
pub fn retry_delay_secs(attempts: i32) -> i64 {
    RETRY_BASE_SECS * 2_i64.pow(attempts.saturating_sub(1).max(0) as u32)
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: NewJob) -> StoreResult<EnqueueOutcome> {
        let operation = StoreOperation::EnqueueJob {
            repo_name: job.repo_name.clone(),
            job_type: job.job_type.to_string(),
        };

        // ON CONFLICT over the partial dedup index: a live duplicate makes
        // the insert a no-op and RETURNING yields no row.
        let row = sqlx::query(
            r"
            INSERT INTO robomonkey_control.job_queue
                (repo_name, schema_name, job_type, payload, priority, status,
                 max_attempts, run_after, dedup_key)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, COALESCE($7, NOW()), $8)
            ON CONFLICT (repo_name, job_type, dedup_key)
                WHERE status IN ('PENDING', 'CLAIMED') AND dedup_key IS NOT NULL
                DO NOTHING
            RETURNING id
            ",
        )
        .bind(&job.repo_name)
        .bind(&job.schema_name)
        .bind(job.job_type.to_string())
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.max_attempts)
        .bind(job.run_after)
        .bind(&job.dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(match row {
            Some(row) => EnqueueOutcome::Enqueued {
                job_id: row.get("id"),
            },
            None => EnqueueOutcome::Deduplicated,
        })
    }

    async fn claim(
        &self,
        claimed_by: &str,
        job_types: &[JobType],
        excluded_repos: &[String],
        limit: i64,
    ) -> StoreResult<Vec<JobRecord>> {
        if limit <= 0 || job_types.is_empty() {
            return Ok(Vec::new());
        }

        let operation = StoreOperation::ClaimJobs {
            claimed_by: claimed_by.to_string(),
        };

        let type_names: Vec<String> = job_types.iter().map(ToString::to_string).collect();

        let rows = sqlx::query(
            r"
            WITH picked AS (
                SELECT id
                FROM robomonkey_control.job_queue
                WHERE status = 'PENDING'
                  AND run_after <= NOW()
                  AND job_type = ANY($2)
                  AND NOT (repo_name = ANY($3))
                ORDER BY priority DESC, run_after ASC, created_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            UPDATE robomonkey_control.job_queue q
            SET status = 'CLAIMED',
                claimed_by = $1,
                claimed_at = NOW(),
                started_at = NOW(),
                attempts = q.attempts + 1
            FROM picked
            WHERE q.id = picked.id
            RETURNING q.*
            ",
        )
        .bind(claimed_by)
        .bind(&type_names)
        .bind(excluded_repos)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_store_err(operation)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(job_from_row(row)?);
        }
        // RETURNING does not preserve the pick order
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.run_after.cmp(&b.run_after))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    async fn complete(&self, job_id: Uuid, claimed_by: &str) -> StoreResult<()> {
        let operation = StoreOperation::CompleteJob { job_id };

        let result = sqlx::query(
            r"
            UPDATE robomonkey_control.job_queue
            SET status = 'DONE', completed_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status = 'CLAIMED'
            ",
        )
        .bind(job_id)
        .bind(claimed_by)
        .execute(&self.pool)
        .await
        .map_store_err(operation.clone())?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Invalid {
                what: "job claim".into(),
                value: job_id.to_string(),
                reason: format!("not claimed by {claimed_by}"),
            });
        }

        self.bump_stats(job_id, true).await
    }

    async fn fail(
        &self,
        job_id: Uuid,
        claimed_by: &str,
        error: &str,
        error_detail: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let operation = StoreOperation::FailJob { job_id };

        // A single statement decides retry vs. terminal failure so the
        // claim check and the transition stay atomic. Retries pass through
        // RETRY conceptually but land as PENDING so the dedup index keeps
        // covering them.
        let row = sqlx::query(
            r"
            UPDATE robomonkey_control.job_queue
            SET status = CASE WHEN attempts < max_attempts THEN 'PENDING' ELSE 'FAILED' END,
                run_after = CASE WHEN attempts < max_attempts
                    THEN NOW() + make_interval(secs => $3 * power(2, attempts - 1))
                    ELSE run_after END,
                claimed_by = NULL,
                claimed_at = NULL,
                completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END,
                error = $4,
                error_detail = $5
            WHERE id = $1 AND claimed_by = $2 AND status = 'CLAIMED'
            RETURNING status
            ",
        )
        .bind(job_id)
        .bind(claimed_by)
        .bind(RETRY_BASE_SECS as f64)
        .bind(error)
        .bind(error_detail)
        .fetch_optional(&self.pool)
        .await
        .map_store_err(operation.clone())?;

        let Some(row) = row else {
            return Err(StoreError::Invalid {
                what: "job claim".into(),
                value: job_id.to_string(),
                reason: format!("not claimed by {claimed_by}"),
            });
        };

        let status: String = row.get("status");
        if status == "FAILED" {
            self.bump_stats(job_id, false).await?;
        }
        Ok(())
    }

    async fn reap_dead(&self, dead_threshold_sec: u64) -> StoreResult<u64> {
        let operation = StoreOperation::ReapDeadJobs;

        // A job is orphaned when its daemon row is stale or gone entirely.
        // Attempts are preserved; the retry budget still applies.
        let result = sqlx::query(
            r"
            UPDATE robomonkey_control.job_queue
            SET status = 'PENDING', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'CLAIMED'
              AND claimed_by NOT IN (
                  SELECT instance_id FROM robomonkey_control.daemon_instance
                  WHERE last_heartbeat >= NOW() - make_interval(secs => $1)
              )
            ",
        )
        .bind(dead_threshold_sec as f64)
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::warn!(reaped, "Reaped jobs from dead workers");
        }
        Ok(reaped)
    }

    async fn cleanup(&self, retention_days: u32) -> StoreResult<u64> {
        let operation = StoreOperation::CleanupJobs;

        let result = sqlx::query(
            r"
            DELETE FROM robomonkey_control.job_queue
            WHERE status IN ('DONE', 'FAILED')
              AND completed_at < NOW() - make_interval(days => $1)
            ",
        )
        .bind(i32::try_from(retention_days).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(result.rows_affected())
    }

    async fn list_jobs(&self, repo_name: &str, limit: i64) -> StoreResult<Vec<JobRecord>> {
        let operation = StoreOperation::Query {
            description: format!("list_jobs({repo_name})"),
        };

        let rows = sqlx::query(
            r"
            SELECT * FROM robomonkey_control.job_queue
            WHERE repo_name = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(repo_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_store_err(operation)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn claimed_counts_by_repo(&self) -> StoreResult<Vec<(String, i64)>> {
        let operation = StoreOperation::Query {
            description: "claimed_counts_by_repo".into(),
        };

        let rows = sqlx::query(
            r"
            SELECT repo_name, COUNT(*) AS claimed
            FROM robomonkey_control.job_queue
            WHERE status = 'CLAIMED'
            GROUP BY repo_name
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("repo_name"), row.get("claimed")))
            .collect())
    }
}

impl PgJobQueue {
    async fn bump_stats(&self, job_id: Uuid, completed: bool) -> StoreResult<()> {
        let operation = StoreOperation::Query {
            description: "bump_job_stats".into(),
        };

        sqlx::query(
            r"
            INSERT INTO robomonkey_control.job_stats (day, repo_name, job_type, completed, failed)
            SELECT CURRENT_DATE, repo_name, job_type,
                   CASE WHEN $2 THEN 1 ELSE 0 END,
                   CASE WHEN $2 THEN 0 ELSE 1 END
            FROM robomonkey_control.job_queue WHERE id = $1
            ON CONFLICT (day, repo_name, job_type)
            DO UPDATE SET
                completed = robomonkey_control.job_stats.completed + EXCLUDED.completed,
                failed = robomonkey_control.job_stats.failed + EXCLUDED.failed
            ",
        )
        .bind(job_id)
        .bind(completed)
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(())
    }
}

/// Daemon liveness registration over `robomonkey_control.daemon_instance`
#[derive(Clone)]
pub struct DaemonRegistry {
    pool: PgPool,
}

impl DaemonRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register (or re-register) this daemon instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn register(&self, instance_id: &str, hostname: &str, pid: i32) -> StoreResult<()> {
        let operation = StoreOperation::Heartbeat {
            instance_id: instance_id.to_string(),
        };

        sqlx::query(
            r"
            INSERT INTO robomonkey_control.daemon_instance
                (instance_id, hostname, pid, status, started_at, last_heartbeat)
            VALUES ($1, $2, $3, 'RUNNING', NOW(), NOW())
            ON CONFLICT (instance_id)
            DO UPDATE SET hostname = EXCLUDED.hostname, pid = EXCLUDED.pid,
                          status = 'RUNNING', started_at = NOW(), last_heartbeat = NOW()
            ",
        )
        .bind(instance_id)
        .bind(hostname)
        .bind(pid)
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(())
    }

    /// Stamp `last_heartbeat` for this instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn heartbeat(&self, instance_id: &str) -> StoreResult<()> {
        let operation = StoreOperation::Heartbeat {
            instance_id: instance_id.to_string(),
        };

        sqlx::query(
            "UPDATE robomonkey_control.daemon_instance SET last_heartbeat = NOW() WHERE instance_id = $1",
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(())
    }

    /// Transition the instance's advertised status (RUNNING/STOPPING).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_status(&self, instance_id: &str, status: &str) -> StoreResult<()> {
        let operation = StoreOperation::Heartbeat {
            instance_id: instance_id.to_string(),
        };

        sqlx::query(
            "UPDATE robomonkey_control.daemon_instance SET status = $2, last_heartbeat = NOW() WHERE instance_id = $1",
        )
        .bind(instance_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(())
    }

    /// All registered daemon instances with their liveness timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self) -> StoreResult<Vec<DaemonInstance>> {
        let operation = StoreOperation::Query {
            description: "list_daemon_instances".into(),
        };

        let rows = sqlx::query(
            r"
            SELECT instance_id, hostname, pid, status, started_at, last_heartbeat
            FROM robomonkey_control.daemon_instance
            ORDER BY started_at DESC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(rows
            .into_iter()
            .map(|row| DaemonInstance {
                instance_id: row.get("instance_id"),
                hostname: row.get("hostname"),
                pid: row.get("pid"),
                status: row.get("status"),
                started_at: row.get("started_at"),
                last_heartbeat: row.get("last_heartbeat"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_schedule() {
        // run_after = now + 60s * 2^(attempts-1)
        assert_eq!(retry_delay_secs(1), 60);
        assert_eq!(retry_delay_secs(2), 120);
        assert_eq!(retry_delay_secs(3), 240);
        assert_eq!(retry_delay_secs(4), 480);
        assert_eq!(retry_delay_secs(5), 960);
    }

    #[test]
    fn test_retry_delay_clamps_degenerate_attempts() {
        assert_eq!(retry_delay_secs(0), 60);
        assert_eq!(retry_delay_secs(-3), 60);
    }
}
