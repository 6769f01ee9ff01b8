//! Signed progress callback sent by workers to `POST /api/v1/callbacks/progress`.

use serde::Deserialize;
use fetchplane_core::progress::{FetchedFile, ProgressUpdate};
use fetchplane_core::types::{DbId, JobId};

use super::job::TransitionFields;
use super::status::JobStatus;

/// Body of a worker progress callback.
///
/// `seq` is a worker-side sequence number; callbacks that repeat a `seq`
/// already seen for the job are dropped before any state changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCallback {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_pct: Option<f64>,
    pub bytes_downloaded: Option<i64>,
    pub bytes_total: Option<i64>,
    pub peers: Option<i32>,
    pub seeds: Option<i32>,
    pub download_rate: Option<i64>,
    pub upload_rate: Option<i64>,
    pub eta_secs: Option<i64>,
    pub seq: Option<u64>,
    pub error: Option<String>,
    pub files: Option<Vec<FetchedFile>>,
}

impl ProgressCallback {
    /// Counter fields written to the job row alongside the status.
    pub fn transition_fields(&self) -> TransitionFields {
        TransitionFields {
            progress_percent: self.progress_pct,
            bytes_downloaded: self.bytes_downloaded,
            bytes_total: self.bytes_total,
            error_message: self.error.clone(),
        }
    }

    /// The partial snapshot update forwarded to the job's progress actor.
    pub fn progress_update(&self, worker_id: Option<DbId>) -> ProgressUpdate {
        ProgressUpdate {
            status: Some(self.status),
            progress_pct: self.progress_pct,
            download_rate: self.download_rate,
            upload_rate: self.upload_rate,
            eta_secs: self.eta_secs,
            peers: self.peers,
            seeds: self.seeds,
            bytes_downloaded: self.bytes_downloaded,
            bytes_total: self.bytes_total,
            worker_id,
            error: self.error.clone(),
            files: self.files.clone(),
        }
    }
}
