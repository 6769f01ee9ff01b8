//! Dispatch queue rows and the message handed to consumers.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use fetchplane_core::types::{DbId, JobId, Timestamp};

/// The unit of work a dispatcher consumer processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub job_id: JobId,
    pub user_id: DbId,
    pub source_type: String,
    pub source_payload: String,
    pub correlation_id: uuid::Uuid,
    pub attempt: i32,
}

/// A row from the `dispatch_queue` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueuedDispatch {
    pub id: DbId,
    pub job_id: JobId,
    pub user_id: DbId,
    pub source_type: String,
    pub source_payload: String,
    pub correlation_id: uuid::Uuid,
    pub attempt: i32,
    pub last_error: Option<String>,
    pub visible_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub enqueued_at: Timestamp,
}

impl QueuedDispatch {
    pub fn message(&self) -> DispatchMessage {
        DispatchMessage {
            job_id: self.job_id,
            user_id: self.user_id,
            source_type: self.source_type.clone(),
            source_payload: self.source_payload.clone(),
            correlation_id: self.correlation_id,
            attempt: self.attempt,
        }
    }
}
