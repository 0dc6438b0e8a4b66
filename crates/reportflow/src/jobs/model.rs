use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type JobId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub params: Value,
    pub status: JobStatus,
    pub error: Option<String>,
    pub artifact_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub params: Value,
}

/// `queued -> processing -> {completed | failed}`. A redelivered message may
/// move a `failed` job back to `processing`; nothing leaves `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// Proof of one `processing` claim. Only its holder may record a failure
/// while the claim is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub token: Uuid,
}

impl Claim {
    pub fn new() -> Self {
        Self {
            token: Uuid::new_v4(),
        }
    }
}

impl Default for Claim {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of trying to move a job into `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker now owns the job until the claim expires.
    Claimed(Claim),
    /// Another delivery holds an unexpired claim.
    InProgress,
    /// The job already finished; the message is a late duplicate.
    AlreadyCompleted,
}

/// Result of trying to move a job into `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Recorded,
    /// The job completed; the failure is stale.
    AlreadyCompleted,
    /// Another delivery owns the job; its row was left alone.
    NotOwner,
}
