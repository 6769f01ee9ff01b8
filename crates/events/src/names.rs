//! Dot-separated event type names.

/// Source entity kinds attached to events.
pub mod entities {
    pub const JOB: &str = "job";
    pub const WORKER: &str = "worker";
}

pub const JOB_SUBMITTED: &str = "job.submitted";
pub const JOB_DISPATCHED: &str = "job.dispatched";
pub const JOB_DEAD_LETTERED: &str = "job.dead_lettered";
pub const JOB_REPLAYED: &str = "job.replayed";
pub const JOB_CANCELLED: &str = "job.cancelled";
pub const JOB_FORCE_FAILED: &str = "job.force_failed";
pub const JOB_EXPIRED: &str = "job.expired";
/// The owning worker stopped reporting while the job was active.
pub const JOB_STALE: &str = "job.stale";

pub const WORKER_REGISTERED: &str = "worker.registered";
pub const WORKER_REINSTATED: &str = "worker.reinstated";
pub const WORKER_STATUS_CHANGED: &str = "worker.status_changed";
