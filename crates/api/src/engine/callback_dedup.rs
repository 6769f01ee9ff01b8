//! Drops replayed worker callbacks.
//!
//! Workers may retry a callback they think was lost. When the callback
//! carries a `seq`, the first `(job id, seq)` pair wins and later copies
//! inside the TTL are dropped before they touch the job row or the actor.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use fetchplane_core::types::JobId;

/// How long a seen sequence number is remembered.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// In-memory TTL set of `(job id, seq)` pairs.
pub struct CallbackDedup {
    ttl: Duration,
    seen: Mutex<HashMap<(JobId, u64), Instant>>,
}

impl CallbackDedup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record the pair. Returns `false` if it was already seen within the TTL.
    pub async fn first_seen(&self, job_id: JobId, seq: u64) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        match seen.entry((job_id, seq)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Forget a pair whose processing failed, so the worker's retry is accepted.
    pub async fn forget(&self, job_id: JobId, seq: u64) {
        self.seen.lock().await.remove(&(job_id, seq));
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for CallbackDedup {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
