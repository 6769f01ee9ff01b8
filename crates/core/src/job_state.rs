//! Job lifecycle statuses and the transition rules between them.
//!
//! ```text
//! submitted -> metadata_fetch -> queued -> downloading -> uploading -> scanning -> completed
//!                                              ^   |
//!                                              |   v
//!                                              paused
//!
//! any non-terminal -> failed | cancelled
//! submitted        -> expired
//! ```
//!
//! `completed`, `failed`, `cancelled`, and `expired` are terminal. Anything
//! aimed at a terminal job is accepted as a no-op so duplicate at-least-once
//! deliveries never surface as errors.

use crate::status::define_status_enum;

define_status_enum! {
    /// Job lifecycle status.
    JobStatus ("job") {
        Submitted = 1 => "submitted",
        MetadataFetch = 2 => "metadata_fetch",
        Queued = 3 => "queued",
        Downloading = 4 => "downloading",
        Uploading = 5 => "uploading",
        Scanning = 6 => "scanning",
        Completed = 7 => "completed",
        Failed = 8 => "failed",
        Cancelled = 9 => "cancelled",
        Expired = 10 => "expired",
        Paused = 11 => "paused",
    }
}

/// Terminal statuses: no further transitions are accepted.
pub const TERMINAL_STATUSES: [JobStatus; 4] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
    JobStatus::Expired,
];

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }

    /// A worker owns the job and is expected to keep reporting.
    ///
    /// `submitted` has no worker yet and `paused` is deliberately silent, so
    /// neither counts for heartbeat staleness.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::MetadataFetch
                | JobStatus::Queued
                | JobStatus::Downloading
                | JobStatus::Uploading
                | JobStatus::Scanning
        )
    }

    /// Position along the main pipeline, or `None` for off-pipeline states.
    fn pipeline_rank(self) -> Option<u8> {
        match self {
            JobStatus::Submitted => Some(0),
            JobStatus::MetadataFetch => Some(1),
            JobStatus::Queued => Some(2),
            JobStatus::Downloading => Some(3),
            JobStatus::Uploading => Some(4),
            JobStatus::Scanning => Some(5),
            JobStatus::Completed => Some(6),
            _ => None,
        }
    }
}

/// Check whether `from -> to` is an edge of the state machine.
///
/// Same-status pairs are not edges; see [`evaluate`] for how they are
/// treated.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    if from.is_terminal() || from == to {
        return false;
    }

    match (from, to) {
        (_, JobStatus::Failed | JobStatus::Cancelled) => true,
        (JobStatus::Submitted, JobStatus::Expired) => true,
        (JobStatus::Downloading, JobStatus::Paused) => true,
        (JobStatus::Paused, JobStatus::Downloading) => true,
        _ => match (from.pipeline_rank(), to.pipeline_rank()) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        },
    }
}

/// What a requested transition should do to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Move to the new status.
    Apply,
    /// Same non-terminal status: keep it, but accept the progress fields.
    Unchanged,
    /// The job is already terminal: accept and ignore.
    NoOp,
}

/// A status change the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid job transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Decide how a request to move a job from `from` to `to` is handled.
pub fn evaluate(from: JobStatus, to: JobStatus) -> Result<TransitionOutcome, InvalidTransition> {
    if from.is_terminal() {
        return Ok(TransitionOutcome::NoOp);
    }
    if from == to {
        return Ok(TransitionOutcome::Unchanged);
    }
    if can_transition(from, to) {
        Ok(TransitionOutcome::Apply)
    } else {
        Err(InvalidTransition { from, to })
    }
}
