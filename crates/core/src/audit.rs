//! Machine-parseable cause codes for the job audit trail.
//!
//! Every row in `job_audit_log` carries one of these so operators can filter
//! terminal outcomes without parsing free-text reasons.

/// Known cause codes for audit log entries.
pub mod causes {
    /// The worker reported a status through a signed callback.
    pub const WORKER_REPORTED: &str = "worker_reported";
    /// The dispatcher exhausted its retry ceiling and dead-lettered the job.
    pub const DISPATCH_EXHAUSTED: &str = "dispatch_exhausted";
    /// The owning user cancelled the job.
    pub const USER_CANCEL: &str = "user_cancel";
    /// An operator cancelled the job from the console.
    pub const OPERATOR_CANCEL: &str = "operator_cancel";
    /// An operator force-failed the job from the console.
    pub const OPERATOR_FAIL: &str = "operator_fail";
    /// An operator replayed a dead-lettered job.
    pub const OPERATOR_REPLAY: &str = "operator_replay";
    /// The job sat unclaimed in `submitted` past the expiry deadline.
    pub const EXPIRED_UNCLAIMED: &str = "expired_unclaimed";
}

/// Actor names recorded for system-initiated changes.
pub mod actors {
    pub const DISPATCHER: &str = "dispatcher";
    pub const WORKER: &str = "worker";
    pub const EXPIRY_SWEEP: &str = "expiry_sweep";
}

/// Format the actor string recorded for a human-initiated change.
pub fn user_actor(user_id: crate::types::DbId) -> String {
    format!("user:{user_id}")
}
