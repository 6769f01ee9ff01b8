//! Job entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;
use fetchplane_core::source::SourceType;
use fetchplane_core::status::UnknownStatus;
use fetchplane_core::types::{DbId, JobId, Timestamp};

use super::status::{serialize_job_status, JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: DbId,
    pub source_type: String,
    pub source_payload: String,
    #[serde(skip_serializing)]
    pub idempotency_key: String,
    #[serde(rename = "status", serialize_with = "serialize_job_status")]
    pub status_id: StatusId,
    pub worker_id: Option<DbId>,
    pub error_message: Option<String>,
    pub progress_percent: f64,
    pub bytes_downloaded: i64,
    pub bytes_total: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Decode the stored status id.
    pub fn status(&self) -> Result<JobStatus, UnknownStatus> {
        JobStatus::from_id(self.status_id).ok_or_else(|| UnknownStatus {
            kind: "job",
            value: self.status_id.to_string(),
        })
    }
}

/// Everything needed to insert a job row and its first dispatch message.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub user_id: DbId,
    pub source_type: SourceType,
    pub source_payload: String,
    pub idempotency_key: String,
    pub correlation_id: uuid::Uuid,
}

/// DTO for submitting a new job via `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJob {
    pub source_type: SourceType,
    pub source_payload: String,
}

/// DTO for `POST /api/v1/admin/jobs/{id}/fail`.
#[derive(Debug, Deserialize, Validate)]
pub struct ForceFailRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status name (e.g. `downloading`).
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Counter fields that may accompany a status transition.
///
/// Counters are clamped by the store: `progress_percent` and
/// `bytes_downloaded` never decrease, and a non-positive `bytes_total` is
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub progress_percent: Option<f64>,
    pub bytes_downloaded: Option<i64>,
    pub bytes_total: Option<i64>,
    pub error_message: Option<String>,
}

/// Who asked for a transition, recorded in the audit log for terminal moves.
#[derive(Debug, Clone, Copy)]
pub struct AuditContext<'a> {
    /// Machine-parseable cause code from `fetchplane_core::audit::causes`.
    pub cause: &'a str,
    pub actor: &'a str,
    pub reason: Option<&'a str>,
}

/// Result of a worker assignment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The job had no owner and now belongs to the worker.
    Assigned,
    /// The job already belonged to this worker.
    AlreadyOwned,
    /// The job is terminal; nothing was changed.
    JobTerminal,
}
