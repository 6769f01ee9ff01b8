//! Live progress snapshots and the merge rules applied to them.
//!
//! A snapshot is owned by exactly one progress actor per job. Updates are
//! merged with [`ProgressSnapshot::apply`], which never lets
//! `bytes_downloaded` or `progress_pct` go backwards: late or duplicated
//! callbacks are accepted but clamped.

use serde::{Deserialize, Serialize};

use crate::job_state::JobStatus;
use crate::types::{DbId, JobId, Timestamp};

/// Seconds without a heartbeat before an active job is flagged stale.
pub const STALE_AFTER_SECS: u64 = 30;

/// How often each actor checks for staleness.
pub const STALE_CHECK_INTERVAL_SECS: u64 = 10;

/// One file reported by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedFile {
    pub path: String,
    pub size_bytes: i64,
}

/// Authoritative live state of a job, pushed to stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_pct: f64,
    pub download_rate: i64,
    pub upload_rate: i64,
    pub eta_secs: Option<i64>,
    pub peers: i32,
    pub seeds: i32,
    pub bytes_downloaded: i64,
    pub bytes_total: i64,
    pub worker_id: Option<DbId>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FetchedFile>,
    pub last_heartbeat_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Partial update merged into a snapshot. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub status: Option<JobStatus>,
    pub progress_pct: Option<f64>,
    pub download_rate: Option<i64>,
    pub upload_rate: Option<i64>,
    pub eta_secs: Option<i64>,
    pub peers: Option<i32>,
    pub seeds: Option<i32>,
    pub bytes_downloaded: Option<i64>,
    pub bytes_total: Option<i64>,
    pub worker_id: Option<DbId>,
    pub error: Option<String>,
    pub files: Option<Vec<FetchedFile>>,
}

impl ProgressUpdate {
    /// An update that only moves the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Clamp a worker-reported percentage into `0..=100`, treating NaN as 0.
pub fn clamp_pct(pct: f64) -> f64 {
    if pct.is_nan() {
        0.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

impl ProgressSnapshot {
    /// A fresh snapshot: all counters zero, status `submitted`.
    pub fn new(job_id: JobId, now: Timestamp) -> Self {
        Self {
            job_id,
            status: JobStatus::Submitted,
            progress_pct: 0.0,
            download_rate: 0,
            upload_rate: 0,
            eta_secs: None,
            peers: 0,
            seeds: 0,
            bytes_downloaded: 0,
            bytes_total: 0,
            worker_id: None,
            error: None,
            files: Vec::new(),
            last_heartbeat_at: None,
            updated_at: now,
        }
    }

    /// Merge `update` into the snapshot and stamp the heartbeat.
    ///
    /// Returns `false` (leaving the snapshot untouched) when the snapshot is
    /// already terminal. A status the state machine does not allow from the
    /// current one is ignored while the counters are still merged.
    pub fn apply(&mut self, update: &ProgressUpdate, now: Timestamp) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if let Some(next) = update.status {
            if next != self.status && crate::job_state::can_transition(self.status, next) {
                self.status = next;
            }
        }

        if let Some(bytes) = update.bytes_downloaded {
            self.bytes_downloaded = self.bytes_downloaded.max(bytes.max(0));
        }
        if let Some(total) = update.bytes_total {
            if total > 0 {
                self.bytes_total = total;
            }
        }
        if let Some(pct) = update.progress_pct {
            self.progress_pct = self.progress_pct.max(clamp_pct(pct));
        }
        if self.status == JobStatus::Completed {
            self.progress_pct = 100.0;
        }

        if let Some(rate) = update.download_rate {
            self.download_rate = rate.max(0);
        }
        if let Some(rate) = update.upload_rate {
            self.upload_rate = rate.max(0);
        }
        if update.eta_secs.is_some() {
            self.eta_secs = update.eta_secs;
        }
        if let Some(peers) = update.peers {
            self.peers = peers.max(0);
        }
        if let Some(seeds) = update.seeds {
            self.seeds = seeds.max(0);
        }
        if update.worker_id.is_some() {
            self.worker_id = update.worker_id;
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
        if let Some(files) = &update.files {
            self.files = files.clone();
        }

        self.last_heartbeat_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Whether silence of `silent_for_secs` should raise a stale event.
    ///
    /// Only active statuses count, and the threshold must be strictly
    /// exceeded.
    pub fn should_flag_stale(&self, silent_for_secs: u64, threshold_secs: u64) -> bool {
        self.status.is_active() && silent_for_secs > threshold_secs
    }
}

/// Message pushed to live stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The full current snapshot.
    Snapshot(ProgressSnapshot),
    /// The owning worker has gone quiet. The job itself is not transitioned.
    #[serde(rename_all = "camelCase")]
    Stale {
        job_id: JobId,
        worker_id: Option<DbId>,
        last_heartbeat_at: Option<Timestamp>,
        silent_for_secs: u64,
    },
}

impl ProgressEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            ProgressEvent::Snapshot(s) => s.job_id,
            ProgressEvent::Stale { job_id, .. } => *job_id,
        }
    }
}
