use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::jobs::model::{Claim, ClaimOutcome, FailOutcome, Job, JobId, JobStatus, NewJob};
use crate::jobs::store::{JobStore, JobStoreError};

/// Process-local job table with the same transition rules as `PgJobStore`.
/// Used by tests and by single-process local runs.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, Entry>,
}

struct Entry {
    job: Job,
    lock_expires_at: Option<DateTime<Utc>>,
    claim: Option<Claim>,
}

impl Entry {
    fn claim_is_live(&self, now: DateTime<Utc>) -> bool {
        self.job.status == JobStatus::Processing
            && self.lock_expires_at.map_or(false, |at| at >= now)
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a job under a caller-chosen id.
    pub fn insert_with_id(&self, id: JobId, job: NewJob) {
        let mut inner = self.lock();
        inner.next_id = inner.next_id.max(id);
        let now = Utc::now();
        inner.jobs.insert(
            id,
            Entry {
                job: Job {
                    id,
                    job_type: job.job_type,
                    params: job.params,
                    status: JobStatus::Queued,
                    error: None,
                    artifact_key: None,
                    created_at: now,
                    updated_at: now,
                },
                lock_expires_at: None,
                claim: None,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        let id = self.lock().next_id + 1;
        self.insert_with_id(id, job);
        Ok(id)
    }

    async fn set_processing(
        &self,
        job_id: JobId,
        lease: Duration,
    ) -> Result<ClaimOutcome, JobStoreError> {
        let mut inner = self.lock();
        let entry = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        let now = Utc::now();
        if entry.job.status == JobStatus::Completed {
            return Ok(ClaimOutcome::AlreadyCompleted);
        }
        if entry.claim_is_live(now) {
            return Ok(ClaimOutcome::InProgress);
        }

        let lease =
            chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365));
        entry.job.status = JobStatus::Processing;
        entry.job.updated_at = now;
        entry.lock_expires_at = now.checked_add_signed(lease);
        let claim = Claim::new();
        entry.claim = Some(claim);
        Ok(ClaimOutcome::Claimed(claim))
    }

    async fn load_params(&self, job_id: JobId) -> Result<Value, JobStoreError> {
        self.lock()
            .jobs
            .get(&job_id)
            .map(|e| e.job.params.clone())
            .ok_or(JobStoreError::NotFound(job_id))
    }

    async fn complete(&self, job_id: JobId, artifact_key: &str) -> Result<(), JobStoreError> {
        let mut inner = self.lock();
        let entry = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        if entry.job.status == JobStatus::Completed
            && entry.job.artifact_key.as_deref() == Some(artifact_key)
        {
            return Ok(());
        }

        entry.job.status = JobStatus::Completed;
        entry.job.artifact_key = Some(artifact_key.to_string());
        entry.job.error = None;
        entry.job.updated_at = Utc::now();
        entry.lock_expires_at = None;
        entry.claim = None;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: JobId,
        error: &str,
        claim: Option<Claim>,
    ) -> Result<FailOutcome, JobStoreError> {
        let mut inner = self.lock();
        let entry = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        if entry.job.status == JobStatus::Completed {
            return Ok(FailOutcome::AlreadyCompleted);
        }
        let owns = match claim {
            Some(claim) => entry.claim == Some(claim),
            None => !entry.claim_is_live(Utc::now()),
        };
        if !owns {
            return Ok(FailOutcome::NotOwner);
        }

        entry.job.status = JobStatus::Failed;
        entry.job.error = Some(error.to_string());
        entry.job.updated_at = Utc::now();
        entry.lock_expires_at = None;
        entry.claim = None;
        Ok(FailOutcome::Recorded)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.lock().jobs.get(&job_id).map(|e| e.job.clone()))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>, JobStoreError> {
        let limit = limit.clamp(1, 500) as usize;
        let mut jobs: Vec<Job> = self.lock().jobs.values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_job(job_type: &str) -> NewJob {
        NewJob {
            job_type: job_type.into(),
            params: json!({}),
        }
    }

    async fn claim(store: &MemoryJobStore, id: JobId, lease: Duration) -> Claim {
        match store.set_processing(id, lease).await.unwrap() {
            ClaimOutcome::Claimed(claim) => claim,
            other => panic!("expected a claim, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn claim_walks_the_state_machine() {
        let store = MemoryJobStore::new();
        let id = store.insert(new_job("payroll")).await.unwrap();
        let lease = Duration::from_secs(300);

        let first = claim(&store, id, lease).await;
        // second delivery while the claim is live
        assert_eq!(
            store.set_processing(id, lease).await.unwrap(),
            ClaimOutcome::InProgress
        );

        assert_eq!(
            store.fail(id, "QUERY_FAILED: boom", Some(first)).await.unwrap(),
            FailOutcome::Recorded
        );
        // redelivery after failure re-enters processing with a new claim
        let second = claim(&store, id, lease).await;
        assert_ne!(first, second);

        store.complete(id, "reports/report-1.csv").await.unwrap();
        assert_eq!(
            store.set_processing(id, lease).await.unwrap(),
            ClaimOutcome::AlreadyCompleted
        );

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.error, None);
    }

    #[tokio::test]
    async fn expired_claim_can_be_taken_over() {
        let store = MemoryJobStore::new();
        let id = store.insert(new_job("payroll")).await.unwrap();

        claim(&store, id, Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(matches!(
            store
                .set_processing(id, Duration::from_secs(300))
                .await
                .unwrap(),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn unclaimed_failure_cannot_break_a_live_claim() {
        let store = MemoryJobStore::new();
        let id = store.insert(new_job("payroll")).await.unwrap();
        claim(&store, id, Duration::from_secs(300)).await;

        assert_eq!(
            store.fail(id, "BAD_PAYLOAD: no type", None).await.unwrap(),
            FailOutcome::NotOwner
        );

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.error, None);
        assert_eq!(
            store
                .set_processing(id, Duration::from_secs(300))
                .await
                .unwrap(),
            ClaimOutcome::InProgress
        );
    }

    #[tokio::test]
    async fn superseded_claim_cannot_fail_the_new_owner() {
        let store = MemoryJobStore::new();
        let id = store.insert(new_job("transactions")).await.unwrap();

        let stale = claim(&store, id, Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let current = claim(&store, id, Duration::from_secs(300)).await;

        assert_eq!(
            store.fail(id, "QUERY_FAILED: late", Some(stale)).await.unwrap(),
            FailOutcome::NotOwner
        );
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
        assert_eq!(
            store.fail(id, "QUERY_FAILED: now", Some(current)).await.unwrap(),
            FailOutcome::Recorded
        );
    }

    #[tokio::test]
    async fn expired_owner_may_still_record_its_failure() {
        let store = MemoryJobStore::new();
        let id = store.insert(new_job("transactions")).await.unwrap();

        let own = claim(&store, id, Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(
            store.fail(id, "TIMEOUT: slow", Some(own)).await.unwrap(),
            FailOutcome::Recorded
        );
    }

    #[tokio::test]
    async fn complete_twice_leaves_state_identical() {
        let store = MemoryJobStore::new();
        let id = store.insert(new_job("transactions")).await.unwrap();
        claim(&store, id, Duration::from_secs(60)).await;

        store.complete(id, "reports/report-1-10.csv").await.unwrap();
        let once = store.get(id).await.unwrap().unwrap();
        store.complete(id, "reports/report-1-10.csv").await.unwrap();
        let twice = store.get(id).await.unwrap().unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn fail_does_not_regress_a_completed_job() {
        let store = MemoryJobStore::new();
        let id = store.insert(new_job("transactions")).await.unwrap();
        store.complete(id, "reports/report-1.csv").await.unwrap();

        assert_eq!(
            store.fail(id, "UNKNOWN: late failure", None).await.unwrap(),
            FailOutcome::AlreadyCompleted
        );

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.error, None);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = MemoryJobStore::new();
        assert!(matches!(
            store.set_processing(9, Duration::from_secs(1)).await,
            Err(JobStoreError::NotFound(9))
        ));
        assert!(matches!(
            store.load_params(9).await,
            Err(JobStoreError::NotFound(9))
        ));
        assert!(matches!(
            store.fail(9, "x", None).await,
            Err(JobStoreError::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_limited() {
        let store = MemoryJobStore::new();
        for _ in 0..5 {
            store.insert(new_job("payroll")).await.unwrap();
        }

        let jobs = store.list_recent(3).await.unwrap();
        let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }
}
