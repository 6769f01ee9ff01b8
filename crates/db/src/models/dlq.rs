//! Dead-letter queue entries and the replay DTO.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;
use fetchplane_core::types::{DbId, JobId, Timestamp};

/// A row from the `dlq_entries` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DlqEntry {
    pub id: DbId,
    pub job_id: JobId,
    /// The dispatch message exactly as it was when it exhausted its retries.
    pub message: serde_json::Value,
    pub attempts: i32,
    pub last_error: String,
    pub dead_lettered_at: Timestamp,
    pub replayed_at: Option<Timestamp>,
    pub replayed_by: Option<String>,
    pub replay_reason: Option<String>,
    pub replay_ticket: Option<String>,
}

impl DlqEntry {
    pub fn is_pending(&self) -> bool {
        self.replayed_at.is_none()
    }
}

/// DTO for `POST /api/v1/admin/dlq/{jobId}/replay`. Both fields are required.
#[derive(Debug, Deserialize, Validate)]
pub struct ReplayRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
    /// Reference to the incident or support ticket that justified the replay.
    #[validate(length(min = 1, max = 200))]
    pub ticket: String,
}

/// Query parameters for `GET /api/v1/admin/dlq`.
#[derive(Debug, Default, Deserialize)]
pub struct DlqListQuery {
    /// Include entries that were already replayed. Defaults to `false`.
    pub include_replayed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
