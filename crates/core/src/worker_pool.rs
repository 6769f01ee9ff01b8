//! Worker fleet rules: statuses, dispatch eligibility, selection, staleness,
//! and heartbeat validation.
//!
//! Pure functions and constants shared by the dispatcher, the heartbeat
//! ingress, and the fleet console.

use crate::error::CoreError;
use crate::status::define_status_enum;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// A worker whose last heartbeat is older than this is reported stale.
pub const HEARTBEAT_STALE_SECS: i64 = 300;

/// Maximum length of a worker name.
const MAX_NAME_LEN: usize = 128;

/// Maximum length of a worker base URL.
const MAX_URL_LEN: usize = 2048;

/// Upper bound on the advertised job capacity of a single worker.
pub const MAX_JOBS_PER_WORKER: i32 = 1024;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

define_status_enum! {
    /// Worker registry status.
    WorkerStatus ("worker") {
        Healthy = 1 => "healthy",
        Cordoned = 2 => "cordoned",
        Draining = 3 => "draining",
        Offline = 4 => "offline",
    }
}

/// Status a worker should have after it sends a heartbeat.
///
/// New and `offline` workers become `healthy`. Operator-set `cordoned` and
/// `draining` are never overridden by the worker itself.
pub fn status_after_heartbeat(current: Option<WorkerStatus>) -> WorkerStatus {
    match current {
        None | Some(WorkerStatus::Offline) | Some(WorkerStatus::Healthy) => WorkerStatus::Healthy,
        Some(other) => other,
    }
}

/// Operator actions available from the fleet console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetAction {
    Cordon,
    Drain,
    Uncordon,
}

impl FleetAction {
    pub fn target_status(self) -> WorkerStatus {
        match self {
            FleetAction::Cordon => WorkerStatus::Cordoned,
            FleetAction::Drain => WorkerStatus::Draining,
            FleetAction::Uncordon => WorkerStatus::Healthy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FleetAction::Cordon => "cordon",
            FleetAction::Drain => "drain",
            FleetAction::Uncordon => "uncordon",
        }
    }
}

/// Check that an operator action makes sense for the worker's current status.
///
/// Uncordoning an `offline` worker is refused: it comes back on its own with
/// the next heartbeat.
pub fn validate_fleet_action(current: WorkerStatus, action: FleetAction) -> Result<(), CoreError> {
    match (current, action) {
        (WorkerStatus::Offline, FleetAction::Uncordon) => Err(CoreError::Conflict(
            "Offline workers are reinstated by their next heartbeat".to_string(),
        )),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The subset of a registry entry the dispatcher needs to pick a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCandidate {
    pub id: DbId,
    pub status: WorkerStatus,
    pub active_jobs: i32,
    pub max_jobs: i32,
}

impl WorkerCandidate {
    /// Healthy with spare capacity.
    pub fn is_eligible(&self) -> bool {
        self.status == WorkerStatus::Healthy && self.active_jobs < self.max_jobs
    }
}

/// Pick the eligible worker with the lowest `active/max` ratio, ties broken
/// by the lowest id. Returns `None` when nobody has capacity.
pub fn select_worker(candidates: &[WorkerCandidate]) -> Option<WorkerCandidate> {
    candidates
        .iter()
        .filter(|c| c.is_eligible())
        .min_by(|a, b| {
            // a.active / a.max  vs  b.active / b.max without floating point.
            let lhs = i64::from(a.active_jobs) * i64::from(b.max_jobs);
            let rhs = i64::from(b.active_jobs) * i64::from(a.max_jobs);
            lhs.cmp(&rhs).then(a.id.cmp(&b.id))
        })
        .copied()
}

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// True when the worker has never reported or its last heartbeat is older
/// than [`HEARTBEAT_STALE_SECS`].
pub fn is_stale(last_heartbeat_at: Option<Timestamp>, now: Timestamp) -> bool {
    match last_heartbeat_at {
        None => true,
        Some(ts) => (now - ts).num_seconds() > HEARTBEAT_STALE_SECS,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a worker name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_worker_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Worker name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Worker name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Worker name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate the base URL a worker advertises for start/cancel calls.
pub fn validate_base_url(url: &str) -> Result<(), CoreError> {
    if url.len() > MAX_URL_LEN {
        return Err(CoreError::Validation(format!(
            "Worker base URL must not exceed {MAX_URL_LEN} characters"
        )));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(CoreError::Validation(
            "Worker base URL must use http or https".to_string(),
        ));
    }
    Ok(())
}

/// Validate advertised capacity and current load.
pub fn validate_capacity(active_jobs: i32, max_jobs: i32) -> Result<(), CoreError> {
    if !(1..=MAX_JOBS_PER_WORKER).contains(&max_jobs) {
        return Err(CoreError::Validation(format!(
            "max_jobs must be between 1 and {MAX_JOBS_PER_WORKER}"
        )));
    }
    if active_jobs < 0 {
        return Err(CoreError::Validation(
            "active_jobs must not be negative".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candidate(id: DbId, active_jobs: i32, max_jobs: i32) -> WorkerCandidate {
        WorkerCandidate {
            id,
            status: WorkerStatus::Healthy,
            active_jobs,
            max_jobs,
        }
    }

    // -- Selection ----------------------------------------------------------

    #[test]
    fn picks_lowest_ratio() {
        let picked = select_worker(&[candidate(1, 3, 4), candidate(2, 1, 4), candidate(3, 2, 2)]);
        assert_eq!(picked.map(|c| c.id), Some(2));
    }

    #[test]
    fn ratio_is_relative_to_capacity() {
        // 2/10 beats 1/2
        let picked = select_worker(&[candidate(1, 1, 2), candidate(2, 2, 10)]);
        assert_eq!(picked.map(|c| c.id), Some(2));
    }

    #[test]
    fn ties_break_on_lowest_id() {
        let picked = select_worker(&[candidate(9, 1, 4), candidate(4, 2, 8), candidate(7, 1, 4)]);
        assert_eq!(picked.map(|c| c.id), Some(4));
    }

    #[test]
    fn skips_full_and_unhealthy_workers() {
        let mut cordoned = candidate(1, 0, 4);
        cordoned.status = WorkerStatus::Cordoned;
        let mut draining = candidate(2, 0, 4);
        draining.status = WorkerStatus::Draining;
        let full = candidate(3, 4, 4);
        assert_eq!(select_worker(&[cordoned, draining, full]), None);
    }

    #[test]
    fn empty_fleet_has_no_capacity() {
        assert_eq!(select_worker(&[]), None);
    }

    // -- Heartbeat status ---------------------------------------------------

    #[test]
    fn heartbeat_reinstates_offline() {
        assert_eq!(status_after_heartbeat(Some(WorkerStatus::Offline)), WorkerStatus::Healthy);
        assert_eq!(status_after_heartbeat(None), WorkerStatus::Healthy);
    }

    #[test]
    fn heartbeat_preserves_operator_status() {
        assert_eq!(status_after_heartbeat(Some(WorkerStatus::Cordoned)), WorkerStatus::Cordoned);
        assert_eq!(status_after_heartbeat(Some(WorkerStatus::Draining)), WorkerStatus::Draining);
    }

    #[test]
    fn uncordon_offline_is_refused() {
        assert!(validate_fleet_action(WorkerStatus::Offline, FleetAction::Uncordon).is_err());
        assert!(validate_fleet_action(WorkerStatus::Cordoned, FleetAction::Uncordon).is_ok());
        assert!(validate_fleet_action(WorkerStatus::Healthy, FleetAction::Drain).is_ok());
    }

    // -- Staleness ----------------------------------------------------------

    #[test]
    fn staleness_threshold() {
        let now = Utc::now();
        assert!(!is_stale(Some(now - Duration::seconds(HEARTBEAT_STALE_SECS)), now));
        assert!(is_stale(Some(now - Duration::seconds(HEARTBEAT_STALE_SECS + 1)), now));
        assert!(is_stale(None, now));
    }

    // -- Validation ---------------------------------------------------------

    #[test]
    fn valid_worker_name() {
        assert!(validate_worker_name("fetch-01.eu_west").is_ok());
    }

    #[test]
    fn worker_name_with_spaces_rejected() {
        assert!(validate_worker_name("fetch 01").is_err());
        assert!(validate_worker_name("").is_err());
    }

    #[test]
    fn base_url_requires_http_scheme() {
        assert!(validate_base_url("http://10.0.0.5:8080").is_ok());
        assert!(validate_base_url("ftp://10.0.0.5").is_err());
    }

    #[test]
    fn capacity_bounds() {
        assert!(validate_capacity(0, 4).is_ok());
        assert!(validate_capacity(0, 0).is_err());
        assert!(validate_capacity(-1, 4).is_err());
    }
}
