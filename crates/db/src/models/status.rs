//! Status enums backed by the `job_statuses` and `worker_statuses` lookup
//! tables, plus serde helpers that render a stored id as its wire name.

use serde::Serializer;

pub use fetchplane_core::job_state::JobStatus;
pub use fetchplane_core::status::StatusId;
pub use fetchplane_core::worker_pool::WorkerStatus;

/// Serialize a job `status_id` column as its lowercase name.
///
/// Unknown ids fall back to the raw number so a bad row is still visible.
pub fn serialize_job_status<S: Serializer>(id: &StatusId, s: S) -> Result<S::Ok, S::Error> {
    match JobStatus::from_id(*id) {
        Some(status) => s.serialize_str(status.as_str()),
        None => s.serialize_i16(*id),
    }
}

/// Serialize a worker `status_id` column as its lowercase name.
pub fn serialize_worker_status<S: Serializer>(id: &StatusId, s: S) -> Result<S::Ok, S::Error> {
    match WorkerStatus::from_id(*id) {
        Some(status) => s.serialize_str(status.as_str()),
        None => s.serialize_i16(*id),
    }
}

/// Optional variant of [`serialize_worker_status`].
pub fn serialize_worker_status_opt<S: Serializer>(
    id: &Option<StatusId>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => serialize_worker_status(id, s),
        None => s.serialize_none(),
    }
}
