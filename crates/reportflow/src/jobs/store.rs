use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::jobs::model::{Claim, ClaimOutcome, FailOutcome, Job, JobId, NewJob};

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} has unreadable status {status:?}")]
    InvalidStatus { id: JobId, status: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Source of truth for job state. Only the worker mutates `status`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: NewJob) -> Result<JobId, JobStoreError>;

    /// Moves the job to `processing` if it is `queued`, `failed`, or stuck in
    /// `processing` past its claim. The claim lasts `lease`.
    async fn set_processing(
        &self,
        job_id: JobId,
        lease: Duration,
    ) -> Result<ClaimOutcome, JobStoreError>;

    async fn load_params(&self, job_id: JobId) -> Result<Value, JobStoreError>;

    /// Terminal success. Calling it again with the same key changes nothing.
    async fn complete(&self, job_id: JobId, artifact_key: &str) -> Result<(), JobStoreError>;

    /// Terminal failure. Overwrites any earlier error text; leaves a
    /// `completed` job untouched.
    ///
    /// With a `claim`, only the holder of that claim may fail the job.
    /// Without one, a `processing` job with an unexpired claim is left alone.
    async fn fail(
        &self,
        job_id: JobId,
        error: &str,
        claim: Option<Claim>,
    ) -> Result<FailOutcome, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Most recent jobs first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>, JobStoreError>;
}
