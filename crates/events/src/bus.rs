//! In-process fan-out of control-plane events over `tokio::sync::broadcast`.
//!
//! Publishers never wait: a full buffer drops the oldest event and a slow
//! subscriber sees `RecvError::Lagged`. Shared as `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use fetchplane_core::types::{DbId, JobId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::names::entities;

const DEFAULT_CAPACITY: usize = 1024;

/// Something that happened to a job or a worker.
///
/// ```rust
/// use fetchplane_events::bus::PlatformEvent;
/// use fetchplane_events::names;
///
/// let event = PlatformEvent::new(names::WORKER_STATUS_CHANGED)
///     .for_worker(3)
///     .with_actor("user:1")
///     .with_payload(serde_json::json!({ "to": "cordoned" }));
/// assert_eq!(event.source_entity_id.as_deref(), Some("3"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// One of the names in [`crate::names`], e.g. `"job.dead_lettered"`.
    pub event_type: String,
    /// `"job"` or `"worker"`.
    pub source_entity_type: Option<String>,
    /// Job UUID or worker id, as text.
    pub source_entity_id: Option<String>,
    /// `"dispatcher"`, `"worker"`, `"user:42"`, ...
    pub actor: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl PlatformEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_entity_type: None,
            source_entity_id: None,
            actor: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl std::fmt::Display,
    ) -> Self {
        self.source_entity_type = Some(entity_type.into());
        self.source_entity_id = Some(entity_id.to_string());
        self
    }

    pub fn for_job(self, job_id: JobId) -> Self {
        self.with_source(entities::JOB, job_id)
    }

    pub fn for_worker(self, worker_id: DbId) -> Self {
        self.with_source(entities::WORKER, worker_id)
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

pub struct EventBus {
    sender: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire and forget. With no subscribers the event is dropped.
    pub fn publish(&self, event: PlatformEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
