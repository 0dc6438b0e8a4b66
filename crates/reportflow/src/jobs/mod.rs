pub mod error_codes;
pub mod memory;
pub mod model;
pub mod repo;
pub mod store;

pub use memory::MemoryJobStore;
pub use model::{Claim, ClaimOutcome, FailOutcome, Job, JobId, JobStatus, NewJob};
pub use repo::PgJobStore;
pub use store::{JobStore, JobStoreError};
