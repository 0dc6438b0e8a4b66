//! The receive -> process -> acknowledge loop for one worker type.
//!
//! One message is handled at a time. A message is acknowledged only after
//! its job is marked `completed`; every other outcome leaves it to come back
//! after the visibility timeout.

use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod backoff;

use crate::handlers::{Handler, JobContext, JobError};
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::{Claim, ClaimOutcome, FailOutcome, JobId, JobStoreError};
use crate::queue::{decode, MessageQueue, ReceivedMessage};
use backoff::{next_delay, BackoffConfig};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Long-poll wait per receive.
    pub wait: Duration,
    /// Visibility window requested on receive.
    pub visibility_timeout: Duration,
    pub batch_size: usize,
    pub backoff: BackoffConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(300),
            batch_size: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Longest gap kept between the claim lease running out and the message
/// becoming visible again.
const MAX_LEASE_MARGIN: Duration = Duration::from_secs(30);

impl ConsumerConfig {
    /// Lease taken on a job claim. Slightly shorter than the visibility
    /// window so a redelivered message never finds its own previous claim
    /// still live.
    pub fn claim_lease(&self) -> Duration {
        let margin = (self.visibility_timeout / 10).min(MAX_LEASE_MARGIN);
        self.visibility_timeout.saturating_sub(margin)
    }
}

/// What happened to one received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Artifact published, job completed, message acknowledged.
    Completed { job_id: JobId, artifact_key: String },
    /// Job marked failed; message left for redelivery.
    Failed { job_id: JobId, error: String },
    /// Message is for another worker type; untouched.
    Skipped { report_type: String },
    /// Job already completed by an earlier delivery; message acknowledged.
    Duplicate { job_id: JobId },
    /// Another delivery holds a live claim on the job; untouched.
    InProgress { job_id: JobId },
    /// The failure could not be recorded because the job was completed or
    /// claimed by another delivery meanwhile; untouched.
    Superseded { job_id: JobId },
    /// No job row for the id; logged only.
    Orphaned { job_id: JobId },
    /// Body names no usable job id; logged only.
    Undecodable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Polling,
    Processing(Vec<ReceivedMessage>),
    Backoff,
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    handler: Handler,
    ctx: JobContext,
    cfg: ConsumerConfig,
    state: LoopState,
    consecutive_faults: u32,
    rng: StdRng,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: Handler,
        ctx: JobContext,
        cfg: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            ctx,
            cfg,
            state: LoopState::Polling,
            consecutive_faults: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    /// Runs until the process ends. Faults never escape; they back off.
    pub async fn run(mut self) {
        info!(
            report_type = %self.handler.report_type(),
            wait_secs = self.cfg.wait.as_secs(),
            visibility_secs = self.cfg.visibility_timeout.as_secs(),
            "consumer started"
        );
        loop {
            self.tick().await;
        }
    }

    /// Advances the loop by one state and returns the dispositions of any
    /// messages handled in this step.
    pub async fn tick(&mut self) -> Vec<Disposition> {
        let mut handled = Vec::new();

        match std::mem::replace(&mut self.state, LoopState::Polling) {
            LoopState::Polling => match self.poll().await {
                Ok(batch) if batch.is_empty() => {
                    self.consecutive_faults = 0;
                }
                Ok(batch) => {
                    self.state = LoopState::Processing(batch);
                }
                Err(e) => self.fault(e),
            },
            LoopState::Processing(batch) => {
                let mut fault = None;
                for message in &batch {
                    match self.process(message).await {
                        Ok(d) => handled.push(d),
                        Err(e) => {
                            // the rest of the batch is redelivered later
                            fault = Some(e);
                            break;
                        }
                    }
                }
                match fault {
                    Some(e) => self.fault(e),
                    None => self.consecutive_faults = 0,
                }
            }
            LoopState::Backoff => {
                let delay = next_delay(self.consecutive_faults, &self.cfg.backoff, &mut self.rng);
                debug!(delay_ms = delay.as_millis() as u64, "backing off");
                tokio::time::sleep(delay).await;
            }
        }

        handled
    }

    fn fault(&mut self, e: anyhow::Error) {
        self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        error!(
            error = %e,
            consecutive_faults = self.consecutive_faults,
            "worker loop error"
        );
        self.state = LoopState::Backoff;
    }

    /// One long-poll receive. Empty on timeout.
    pub async fn poll(&self) -> anyhow::Result<Vec<ReceivedMessage>> {
        self.queue
            .receive(
                self.cfg.batch_size.max(1),
                self.cfg.wait,
                self.cfg.visibility_timeout,
            )
            .await
    }

    /// Handles one message. `Err` means the queue or job table itself
    /// failed; handler failures come back as `Disposition::Failed`.
    #[tracing::instrument(
        skip_all,
        fields(message_id = %message.message_id, receive_count = message.receive_count)
    )]
    pub async fn process(&self, message: &ReceivedMessage) -> anyhow::Result<Disposition> {
        let msg = match decode(&message.body) {
            Ok(msg) => msg,
            Err(e) => {
                let Some(job_id) = e.job_id() else {
                    warn!(error = %e, "undecodable message left for redelivery");
                    return Ok(Disposition::Undecodable);
                };
                let err = JobError::new(ErrorCode::BadPayload, e.to_string());
                return self.record_failure(job_id, &err, None).await;
            }
        };

        let worker_type = self.handler.report_type();
        if msg.report_type != worker_type.as_str() {
            debug!(
                job_id = msg.job_id,
                report_type = %msg.report_type,
                worker_type = %worker_type,
                "message for another worker type, skipping"
            );
            return Ok(Disposition::Skipped {
                report_type: msg.report_type,
            });
        }

        let job_id = msg.job_id;
        let claim = match self
            .ctx
            .store
            .set_processing(job_id, self.cfg.claim_lease())
            .await
        {
            Ok(ClaimOutcome::Claimed(claim)) => claim,
            Ok(ClaimOutcome::AlreadyCompleted) => {
                self.acknowledge(message).await?;
                info!(job_id, "job already completed, acknowledged duplicate delivery");
                return Ok(Disposition::Duplicate { job_id });
            }
            Ok(ClaimOutcome::InProgress) => {
                warn!(job_id, "job is being processed by another delivery");
                return Ok(Disposition::InProgress { job_id });
            }
            Err(JobStoreError::NotFound(_)) => {
                warn!(job_id, "job row not found");
                return Ok(Disposition::Orphaned { job_id });
            }
            Err(e) => return Err(e.into()),
        };

        info!(job_id, report_type = %worker_type, "processing job");

        match self.handler.run(job_id, &self.ctx).await {
            Ok(artifact) => {
                self.ctx.store.complete(job_id, &artifact.key).await?;
                self.acknowledge(message).await?;
                info!(
                    job_id,
                    artifact_key = %artifact.key,
                    rows = artifact.row_count,
                    bytes = artifact.size_bytes,
                    "job completed"
                );
                Ok(Disposition::Completed {
                    job_id,
                    artifact_key: artifact.key,
                })
            }
            Err(err) => self.record_failure(job_id, &err, Some(claim)).await,
        }
    }

    async fn record_failure(
        &self,
        job_id: JobId,
        err: &JobError,
        claim: Option<Claim>,
    ) -> anyhow::Result<Disposition> {
        error!(job_id, code = %err.code, error = %err.message, "job failed, left for redelivery");

        let stored = err.to_stored();
        match self.ctx.store.fail(job_id, &stored, claim).await {
            Ok(FailOutcome::Recorded) => Ok(Disposition::Failed {
                job_id,
                error: stored,
            }),
            Ok(outcome) => {
                warn!(job_id, ?outcome, "job moved on without this delivery, failure not recorded");
                Ok(Disposition::Superseded { job_id })
            }
            Err(JobStoreError::NotFound(_)) => {
                warn!(job_id, "cannot mark missing job as failed");
                Ok(Disposition::Orphaned { job_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn acknowledge(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        if !self.queue.acknowledge(&message.receipt).await? {
            warn!(
                message_id = %message.message_id,
                "receipt expired before acknowledgment; message will be redelivered"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_visibility(visibility_timeout: Duration) -> ConsumerConfig {
        ConsumerConfig {
            visibility_timeout,
            ..ConsumerConfig::default()
        }
    }

    #[test]
    fn claim_lease_ends_before_visibility() {
        assert_eq!(
            with_visibility(Duration::from_secs(300)).claim_lease(),
            Duration::from_secs(270)
        );
        assert_eq!(
            with_visibility(Duration::from_millis(40)).claim_lease(),
            Duration::from_millis(36)
        );
    }

    #[test]
    fn claim_lease_margin_is_capped() {
        assert_eq!(
            with_visibility(Duration::from_secs(3600)).claim_lease(),
            Duration::from_secs(3570)
        );
        assert_eq!(with_visibility(Duration::ZERO).claim_lease(), Duration::ZERO);
    }
}
