// crates/reportflow/src/jobs/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;

use crate::jobs::model::{Claim, ClaimOutcome, FailOutcome, Job, JobId, JobStatus, NewJob};
use crate::jobs::store::{JobStore, JobStoreError};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    #[sqlx(rename = "type")]
    job_type: String,
    params: Value,
    status: String,
    error: Option<String>,
    artifact_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|status| JobStoreError::InvalidStatus { id: row.id, status })?;

        Ok(Job {
            id: row.id,
            job_type: row.job_type,
            params: row.params,
            status,
            error: row.error,
            artifact_key: row.artifact_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// `report_jobs` in Postgres.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, job_id: JobId) -> Result<Option<JobStatus>, JobStoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM report_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|s| {
                s.parse::<JobStatus>()
                    .map_err(|status| JobStoreError::InvalidStatus { id: job_id, status })
            })
            .transpose()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO report_jobs (type, params, status)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&job.job_type)
        .bind(&job.params)
        .bind(JobStatus::Queued.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn set_processing(
        &self,
        job_id: JobId,
        lease: Duration,
    ) -> Result<ClaimOutcome, JobStoreError> {
        // A processing row whose claim ran out belongs to a worker that died
        // or overran the visibility window; it can be taken over.
        let claim = Claim::new();
        let claimed: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE report_jobs
            SET status = 'processing',
                lock_expires_at = now() + ($2::bigint * interval '1 millisecond'),
                claim_token = $3,
                updated_at = now()
            WHERE id = $1
              AND (
                    status IN ('queued', 'failed')
                 OR (status = 'processing'
                     AND (lock_expires_at IS NULL OR lock_expires_at < now()))
              )
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(lease.as_millis() as i64)
        .bind(claim.token)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed(claim));
        }

        match self.current_status(job_id).await? {
            None => Err(JobStoreError::NotFound(job_id)),
            Some(JobStatus::Completed) => Ok(ClaimOutcome::AlreadyCompleted),
            Some(_) => Ok(ClaimOutcome::InProgress),
        }
    }

    async fn load_params(&self, job_id: JobId) -> Result<Value, JobStoreError> {
        let params: Option<Value> =
            sqlx::query_scalar("SELECT params FROM report_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        params.ok_or(JobStoreError::NotFound(job_id))
    }

    async fn complete(&self, job_id: JobId, artifact_key: &str) -> Result<(), JobStoreError> {
        let res = sqlx::query(
            r#"
            UPDATE report_jobs
            SET status = 'completed',
                artifact_key = $2,
                error = NULL,
                lock_expires_at = NULL,
                claim_token = NULL,
                updated_at = now()
            WHERE id = $1
              AND NOT (status = 'completed' AND artifact_key IS NOT DISTINCT FROM $2)
            "#,
        )
        .bind(job_id)
        .bind(artifact_key)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 && self.current_status(job_id).await?.is_none() {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: JobId,
        error: &str,
        claim: Option<Claim>,
    ) -> Result<FailOutcome, JobStoreError> {
        let res = sqlx::query(
            r#"
            UPDATE report_jobs
            SET status = 'failed',
                error = $2,
                lock_expires_at = NULL,
                claim_token = NULL,
                updated_at = now()
            WHERE id = $1
              AND status <> 'completed'
              AND (
                    ($3::uuid IS NOT NULL AND claim_token = $3)
                 OR ($3::uuid IS NULL
                     AND (status IN ('queued', 'failed')
                          OR lock_expires_at IS NULL
                          OR lock_expires_at < now()))
              )
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(claim.map(|c| c.token))
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            return Ok(FailOutcome::Recorded);
        }

        match self.current_status(job_id).await? {
            None => Err(JobStoreError::NotFound(job_id)),
            Some(JobStatus::Completed) => Ok(FailOutcome::AlreadyCompleted),
            Some(_) => Ok(FailOutcome::NotOwner),
        }
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, type, params, status, error, artifact_key, created_at, updated_at
            FROM report_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>, JobStoreError> {
        let limit = limit.clamp(1, 500);

        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, type, params, status, error, artifact_key, created_at, updated_at
            FROM report_jobs
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}
