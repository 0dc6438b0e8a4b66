// crates/reportflow/src/api/models.rs
use serde::Serialize;

use crate::jobs::error_codes::suggested_action;
use crate::jobs::{Job, JobStatus};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// `GET /jobs/:id` body: the job row plus an operator hint when it failed.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<&'static str>,
}

impl From<Job> for JobDetail {
    fn from(job: Job) -> Self {
        let suggested_action = match (&job.status, &job.error) {
            (JobStatus::Failed, Some(error)) => Some(suggested_action(error)),
            _ => None,
        };
        Self {
            job,
            suggested_action,
        }
    }
}
