use fetchplane_core::job_state::InvalidTransition;
use fetchplane_core::status::UnknownStatus;
use fetchplane_core::types::{DbId, JobId};

/// Failures from the job record store.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    /// A live (or recently completed) job already exists for this source.
    #[error("Duplicate submission: job {existing} already covers this source")]
    DuplicateSubmission { existing: JobId },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Another worker owns the job while it is still non-terminal.
    #[error("Job {job_id} is already assigned to worker {current}")]
    AlreadyAssigned { job_id: JobId, current: DbId },

    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The stored status id has no matching enum variant.
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Failures when replaying a dead-lettered job.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The job has no DLQ entry waiting for replay.
    #[error("No pending DLQ entry for job {0}")]
    NoPendingEntry(JobId),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

impl From<sqlx::Error> for ReplayError {
    fn from(err: sqlx::Error) -> Self {
        ReplayError::Store(JobStoreError::Database(err))
    }
}
