//! Worker registry models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use fetchplane_core::status::UnknownStatus;
use fetchplane_core::types::{DbId, Timestamp};
use fetchplane_core::worker_pool::WorkerCandidate;

use super::status::{
    serialize_worker_status, serialize_worker_status_opt, StatusId, WorkerStatus,
};

/// A row from the `workers` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Worker {
    pub id: DbId,
    pub name: String,
    pub base_url: String,
    #[serde(rename = "status", serialize_with = "serialize_worker_status")]
    pub status_id: StatusId,
    pub active_jobs: i32,
    pub max_jobs: i32,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_free_bytes: Option<i64>,
    pub bandwidth_bps: Option<i64>,
    pub version: Option<String>,
    pub last_heartbeat_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Worker {
    pub fn status(&self) -> Result<WorkerStatus, UnknownStatus> {
        WorkerStatus::from_id(self.status_id).ok_or_else(|| UnknownStatus {
            kind: "worker",
            value: self.status_id.to_string(),
        })
    }

    /// Selection view of this worker. Unknown statuses are never eligible.
    pub fn candidate(&self) -> Option<WorkerCandidate> {
        Some(WorkerCandidate {
            id: self.id,
            status: self.status().ok()?,
            active_jobs: self.active_jobs,
            max_jobs: self.max_jobs,
        })
    }
}

/// Heartbeat payload sent by a worker to `POST /api/v1/workers/heartbeat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHeartbeat {
    pub name: String,
    pub base_url: String,
    pub active_jobs: i32,
    pub max_jobs: i32,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_free_bytes: Option<i64>,
    pub bandwidth_bps: Option<i64>,
    pub version: Option<String>,
}

/// Outcome of recording a heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatRecorded {
    pub worker: Worker,
    /// The worker was `offline` and the heartbeat brought it back.
    pub reinstated: bool,
    /// The worker row did not exist before this heartbeat.
    pub registered: bool,
}

/// A row from the `worker_health_log` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkerHealthLogEntry {
    pub id: DbId,
    pub worker_id: DbId,
    #[serde(rename = "from_status", serialize_with = "serialize_worker_status_opt")]
    pub from_status_id: Option<StatusId>,
    #[serde(rename = "to_status", serialize_with = "serialize_worker_status")]
    pub to_status_id: StatusId,
    pub reason: Option<String>,
    pub actor: String,
    pub created_at: Timestamp,
}

/// DTO for operator status changes (`cordon`, `drain`, `uncordon`).
#[derive(Debug, Default, Deserialize)]
pub struct FleetActionRequest {
    pub reason: Option<String>,
}
