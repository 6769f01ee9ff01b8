//! Job audit log rows.

use serde::Serialize;
use sqlx::FromRow;
use fetchplane_core::types::{DbId, JobId, Timestamp};

use super::status::{serialize_job_status, StatusId};

/// A row from the `job_audit_log` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobAuditEntry {
    pub id: DbId,
    pub job_id: JobId,
    #[serde(rename = "from_status", serialize_with = "serialize_job_status")]
    pub from_status_id: StatusId,
    #[serde(rename = "to_status", serialize_with = "serialize_job_status")]
    pub to_status_id: StatusId,
    pub reason: Option<String>,
    pub cause: String,
    pub actor: String,
    pub created_at: Timestamp,
}
