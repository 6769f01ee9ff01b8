//! Per-job progress actors.
//!
//! Every job with live traffic gets one Tokio task that owns its
//! [`ProgressSnapshot`]. The [`ProgressHub`] maps job ids to the actor's
//! command channel and spawns actors on first use, so all mutation of one
//! job's snapshot is serialized through one task and subscribers never see
//! snapshots out of order.
//!
//! An actor:
//! - loads the last persisted snapshot on spawn (falling back to the job row),
//! - merges updates, persists, then pushes the full snapshot to subscribers,
//! - checks for a silent worker every `check_interval_secs`,
//! - exits after `idle_evict_secs` without subscribers or traffic.
//!
//! Pushes never wait on a subscriber: a full or closed subscriber channel
//! drops that subscriber only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use fetchplane_core::progress::{ProgressEvent, ProgressSnapshot, ProgressUpdate};
use fetchplane_core::types::JobId;
use fetchplane_db::repositories::{JobRepo, SnapshotRepo};
use fetchplane_db::DbPool;
use fetchplane_events::names;
use fetchplane_events::{EventBus, PlatformEvent};

use crate::config::ProgressConfig;

/// Command queue depth per actor.
const COMMAND_BUFFER: usize = 256;

/// Receiving end of a live stream. The first message is the current snapshot.
pub type Subscription = mpsc::Receiver<ProgressEvent>;

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Progress actor for job {0} is unavailable")]
    Unavailable(JobId),
}

// ---------------------------------------------------------------------------
// Snapshot store
// ---------------------------------------------------------------------------

/// Where actors persist snapshots and reload them after a restart.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, job_id: JobId) -> Result<Option<ProgressSnapshot>, sqlx::Error>;
    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), sqlx::Error>;
}

/// [`SnapshotStore`] backed by `progress_snapshots`, falling back to the
/// `jobs` row for jobs that never had a snapshot written.
pub struct PgSnapshotStore {
    pool: DbPool,
}

impl PgSnapshotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self, job_id: JobId) -> Result<Option<ProgressSnapshot>, sqlx::Error> {
        if let Some(snapshot) = SnapshotRepo::load(&self.pool, job_id).await? {
            return Ok(Some(snapshot));
        }

        let Some(job) = JobRepo::find_by_id(&self.pool, job_id).await? else {
            return Ok(None);
        };
        let Ok(status) = job.status() else {
            return Ok(None);
        };

        let mut snapshot = ProgressSnapshot::new(job_id, job.updated_at);
        snapshot.status = status;
        snapshot.progress_pct = job.progress_percent;
        snapshot.bytes_downloaded = job.bytes_downloaded;
        snapshot.bytes_total = job.bytes_total;
        snapshot.worker_id = job.worker_id;
        snapshot.error = job.error_message;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), sqlx::Error> {
        SnapshotRepo::upsert(&self.pool, snapshot).await
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

enum Command {
    Init {
        reply: oneshot::Sender<ProgressSnapshot>,
    },
    Update {
        update: ProgressUpdate,
        reply: oneshot::Sender<Option<ProgressSnapshot>>,
    },
    Subscribe {
        reply: oneshot::Sender<Subscription>,
    },
    Snapshot {
        reply: oneshot::Sender<ProgressSnapshot>,
    },
}

/// Registry of live progress actors, keyed by job id.
pub struct ProgressHub {
    actors: Mutex<HashMap<JobId, mpsc::Sender<Command>>>,
    store: Arc<dyn SnapshotStore>,
    event_bus: Arc<EventBus>,
    config: ProgressConfig,
}

impl ProgressHub {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        event_bus: Arc<EventBus>,
        config: ProgressConfig,
    ) -> Self {
        Self {
            actors: Mutex::new(HashMap::new()),
            store,
            event_bus,
            config,
        }
    }

    /// Reset the job's snapshot to a fresh `submitted` state.
    ///
    /// Call it before the transaction that makes the job dispatchable
    /// commits, so no worker update can reach the actor first. Nothing is
    /// persisted: with no snapshot row the store falls back to the job row,
    /// and the first accepted update writes one.
    pub async fn init(&self, job_id: JobId) -> Result<ProgressSnapshot, ProgressError> {
        self.request(job_id, |reply| Command::Init { reply }).await
    }

    /// Merge an update and push the result to subscribers.
    ///
    /// Returns `None` when the snapshot is already terminal and the update
    /// was ignored.
    pub async fn update(
        &self,
        job_id: JobId,
        update: ProgressUpdate,
    ) -> Result<Option<ProgressSnapshot>, ProgressError> {
        self.request(job_id, |reply| Command::Update {
            update: update.clone(),
            reply,
        })
        .await
    }

    /// Open a stream that starts with the current snapshot.
    pub async fn subscribe(&self, job_id: JobId) -> Result<Subscription, ProgressError> {
        self.request(job_id, |reply| Command::Subscribe { reply }).await
    }

    /// The actor's current snapshot.
    pub async fn snapshot(&self, job_id: JobId) -> Result<ProgressSnapshot, ProgressError> {
        self.request(job_id, |reply| Command::Snapshot { reply }).await
    }

    /// Drop the job's actor so the next request reloads it from the store.
    pub async fn evict(&self, job_id: JobId) {
        self.actors.lock().await.remove(&job_id);
    }

    /// Number of live actors.
    pub async fn actor_count(&self) -> usize {
        let mut actors = self.actors.lock().await;
        actors.retain(|_, sender| !sender.is_closed());
        actors.len()
    }

    /// Drop every actor handle. Actors finish their queued commands and
    /// exit, which closes all subscriber streams.
    pub async fn shutdown(&self) {
        let mut actors = self.actors.lock().await;
        let count = actors.len();
        actors.clear();
        tracing::info!(count, "Progress actors released");
    }

    async fn request<T>(
        &self,
        job_id: JobId,
        make: impl Fn(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ProgressError> {
        // A second pass covers an actor that was evicted between lookup and send.
        for _ in 0..2 {
            let sender = self.sender_for(job_id).await;
            let (reply, response) = oneshot::channel();
            if sender.send(make(reply)).await.is_err() {
                self.forget(job_id, &sender).await;
                continue;
            }
            return response.await.map_err(|_| ProgressError::Unavailable(job_id));
        }
        Err(ProgressError::Unavailable(job_id))
    }

    async fn sender_for(&self, job_id: JobId) -> mpsc::Sender<Command> {
        let mut actors = self.actors.lock().await;
        if let Some(sender) = actors.get(&job_id) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }
        actors.retain(|_, sender| !sender.is_closed());

        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_actor(
            job_id,
            Arc::clone(&self.store),
            Arc::clone(&self.event_bus),
            self.config.clone(),
            commands,
        ));
        actors.insert(job_id, sender.clone());
        tracing::debug!(job_id = %job_id, "Progress actor spawned");
        sender
    }

    async fn forget(&self, job_id: JobId, sender: &mpsc::Sender<Command>) {
        let mut actors = self.actors.lock().await;
        if actors
            .get(&job_id)
            .is_some_and(|current| current.same_channel(sender))
        {
            actors.remove(&job_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ProgressActor {
    job_id: JobId,
    snapshot: ProgressSnapshot,
    subscribers: Vec<mpsc::Sender<ProgressEvent>>,
    store: Arc<dyn SnapshotStore>,
    event_bus: Arc<EventBus>,
    config: ProgressConfig,
    /// Monotonic clock of the last accepted update, for staleness.
    last_heartbeat: Instant,
    /// Any command at all, for idle eviction.
    last_activity: Instant,
    /// A stale event was already raised for the current silence.
    stale_flagged: bool,
}

async fn run_actor(
    job_id: JobId,
    store: Arc<dyn SnapshotStore>,
    event_bus: Arc<EventBus>,
    config: ProgressConfig,
    commands: mpsc::Receiver<Command>,
) {
    let snapshot = match store.load(job_id).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => ProgressSnapshot::new(job_id, Utc::now()),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load progress snapshot");
            ProgressSnapshot::new(job_id, Utc::now())
        }
    };

    // Silence carries over a reload: the clock starts at the persisted
    // heartbeat, not at respawn.
    let now = Instant::now();
    let last_heartbeat = snapshot
        .last_heartbeat_at
        .and_then(|at| (Utc::now() - at).to_std().ok())
        .and_then(|silent| now.checked_sub(silent))
        .unwrap_or(now);
    let actor = ProgressActor {
        job_id,
        snapshot,
        subscribers: Vec::new(),
        store,
        event_bus,
        config,
        last_heartbeat,
        last_activity: now,
        stale_flagged: false,
    };
    actor.serve(commands).await;
}

impl ProgressActor {
    async fn serve(mut self, mut commands: mpsc::Receiver<Command>) {
        let period = Duration::from_secs(self.config.check_interval_secs);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    self.check_stale();
                    if self.is_idle() {
                        commands.close();
                        while let Ok(command) = commands.try_recv() {
                            self.handle(command).await;
                        }
                        tracing::debug!(job_id = %self.job_id, "Progress actor evicted after idle period");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        self.last_activity = Instant::now();
        match command {
            Command::Init { reply } => {
                self.snapshot = ProgressSnapshot::new(self.job_id, Utc::now());
                self.last_heartbeat = Instant::now();
                self.stale_flagged = false;
                self.fan_out(ProgressEvent::Snapshot(self.snapshot.clone()));
                let _ = reply.send(self.snapshot.clone());
            }
            Command::Update { update, reply } => {
                if !self.snapshot.apply(&update, Utc::now()) {
                    tracing::debug!(job_id = %self.job_id, "Update after terminal status ignored");
                    let _ = reply.send(None);
                    return;
                }
                self.last_heartbeat = Instant::now();
                self.stale_flagged = false;
                self.persist().await;
                self.fan_out(ProgressEvent::Snapshot(self.snapshot.clone()));
                let _ = reply.send(Some(self.snapshot.clone()));
            }
            Command::Subscribe { reply } => {
                let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1));
                // The channel is empty, so the baseline always fits.
                if sender
                    .try_send(ProgressEvent::Snapshot(self.snapshot.clone()))
                    .is_ok()
                {
                    self.subscribers.push(sender);
                }
                tracing::debug!(
                    job_id = %self.job_id,
                    subscribers = self.subscribers.len(),
                    "Progress subscriber added",
                );
                let _ = reply.send(receiver);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot.clone());
            }
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.snapshot).await {
            tracing::error!(job_id = %self.job_id, error = %e, "Failed to persist progress snapshot");
        }
    }

    fn fan_out(&mut self, event: ProgressEvent) {
        let job_id = self.job_id;
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(job_id = %job_id, "Dropping progress subscriber that fell behind");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }

    fn check_stale(&mut self) {
        self.subscribers.retain(|subscriber| !subscriber.is_closed());
        if self.stale_flagged {
            return;
        }

        let silent_for_secs = self.last_heartbeat.elapsed().as_secs();
        if !self
            .snapshot
            .should_flag_stale(silent_for_secs, self.config.stale_after_secs)
        {
            return;
        }
        self.stale_flagged = true;

        tracing::warn!(
            job_id = %self.job_id,
            worker_id = ?self.snapshot.worker_id,
            silent_for_secs,
            "Worker has gone quiet on an active job",
        );
        self.fan_out(ProgressEvent::Stale {
            job_id: self.job_id,
            worker_id: self.snapshot.worker_id,
            last_heartbeat_at: self.snapshot.last_heartbeat_at,
            silent_for_secs,
        });
        self.event_bus.publish(
            PlatformEvent::new(names::JOB_STALE)
                .for_job(self.job_id)
                .with_payload(serde_json::json!({
                    "worker_id": self.snapshot.worker_id,
                    "status": self.snapshot.status,
                    "silent_for_secs": silent_for_secs,
                })),
        );
    }

    fn is_idle(&self) -> bool {
        self.subscribers.is_empty()
            && self.last_activity.elapsed() >= Duration::from_secs(self.config.idle_evict_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fetchplane_core::job_state::JobStatus;

    #[derive(Default)]
    struct MemoryStore {
        snapshots: std::sync::Mutex<HashMap<JobId, ProgressSnapshot>>,
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn load(&self, job_id: JobId) -> Result<Option<ProgressSnapshot>, sqlx::Error> {
            Ok(self.snapshots.lock().unwrap().get(&job_id).cloned())
        }

        async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), sqlx::Error> {
            self.snapshots
                .lock()
                .unwrap()
                .insert(snapshot.job_id, snapshot.clone());
            Ok(())
        }
    }

    fn hub_with(store: Arc<MemoryStore>) -> ProgressHub {
        ProgressHub::new(store, Arc::new(EventBus::default()), ProgressConfig::default())
    }

    fn job() -> JobId {
        uuid::Uuid::from_u128(42)
    }

    fn downloaded(status: JobStatus, bytes: i64) -> ProgressUpdate {
        ProgressUpdate {
            status: Some(status),
            bytes_downloaded: Some(bytes),
            ..Default::default()
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn expect_snapshot(event: Option<ProgressEvent>) -> ProgressSnapshot {
        match event {
            Some(ProgressEvent::Snapshot(s)) => s,
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }

    // -- Fan-out --

    #[tokio::test]
    async fn late_subscriber_gets_latest_snapshot_first() {
        let hub = hub_with(Arc::default());
        hub.init(job()).await.unwrap();
        hub.update(job(), downloaded(JobStatus::Downloading, 1_200))
            .await
            .unwrap();

        let mut stream = hub.subscribe(job()).await.unwrap();
        let first = expect_snapshot(stream.recv().await);
        assert_eq!(first.status, JobStatus::Downloading);
        assert_eq!(first.bytes_downloaded, 1_200);
    }

    #[tokio::test]
    async fn updates_arrive_in_order() {
        let hub = hub_with(Arc::default());
        hub.init(job()).await.unwrap();
        let mut stream = hub.subscribe(job()).await.unwrap();

        for bytes in [100, 200, 300] {
            hub.update(job(), downloaded(JobStatus::Downloading, bytes))
                .await
                .unwrap();
        }

        let seen: Vec<i64> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                out.push(expect_snapshot(stream.recv().await).bytes_downloaded);
            }
            out
        };
        assert_eq!(seen, vec![0, 100, 200, 300]);
    }

    #[tokio::test]
    async fn closed_subscriber_does_not_affect_others() {
        let hub = hub_with(Arc::default());
        hub.init(job()).await.unwrap();
        let dropped = hub.subscribe(job()).await.unwrap();
        let mut kept = hub.subscribe(job()).await.unwrap();
        drop(dropped);

        hub.update(job(), downloaded(JobStatus::Downloading, 10))
            .await
            .unwrap();

        expect_snapshot(kept.recv().await);
        assert_eq!(expect_snapshot(kept.recv().await).bytes_downloaded, 10);
    }

    #[tokio::test]
    async fn terminal_snapshot_ignores_late_updates() {
        let hub = hub_with(Arc::default());
        hub.init(job()).await.unwrap();
        hub.update(job(), ProgressUpdate::status(JobStatus::Completed))
            .await
            .unwrap();

        let ignored = hub
            .update(job(), downloaded(JobStatus::Downloading, 5))
            .await
            .unwrap();
        assert!(ignored.is_none());
        assert_eq!(hub.snapshot(job()).await.unwrap().status, JobStatus::Completed);
    }

    // -- Staleness --

    #[tokio::test(start_paused = true)]
    async fn stale_is_flagged_on_the_first_tick_past_threshold() {
        let hub = hub_with(Arc::default());
        hub.update(job(), downloaded(JobStatus::Downloading, 1))
            .await
            .unwrap();
        let mut stream = hub.subscribe(job()).await.unwrap();
        expect_snapshot(stream.recv().await);

        // Ticks at 10s, 20s, 30s: silence is never strictly over 30s.
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(10)).await;
            settle().await;
        }
        assert!(stream.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_matches!(
            stream.try_recv(),
            Ok(ProgressEvent::Stale { silent_for_secs: 40, .. })
        );

        // Raised once per silence.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert!(stream.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_job_is_never_stale() {
        let hub = hub_with(Arc::default());
        hub.update(job(), downloaded(JobStatus::Downloading, 1))
            .await
            .unwrap();
        hub.update(job(), ProgressUpdate::status(JobStatus::Paused))
            .await
            .unwrap();
        let mut stream = hub.subscribe(job()).await.unwrap();
        expect_snapshot(stream.recv().await);

        for _ in 0..6 {
            tokio::time::advance(Duration::from_secs(10)).await;
            settle().await;
        }
        assert!(stream.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reloaded_silence_is_flagged_on_the_next_tick() {
        let store = Arc::new(MemoryStore::default());
        let mut persisted = ProgressSnapshot::new(job(), Utc::now());
        persisted.status = JobStatus::Downloading;
        persisted.worker_id = Some(3);
        persisted.last_heartbeat_at = Some(Utc::now() - chrono::Duration::seconds(45));
        store.save(&persisted).await.unwrap();

        let hub = hub_with(store);
        let mut stream = hub.subscribe(job()).await.unwrap();
        expect_snapshot(stream.recv().await);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_matches!(
            stream.try_recv(),
            Ok(ProgressEvent::Stale { worker_id: Some(3), silent_for_secs, .. }) if silent_for_secs >= 55
        );
    }

    // -- Lifecycle --

    #[tokio::test]
    async fn restarted_hub_reloads_persisted_snapshot() {
        let store = Arc::new(MemoryStore::default());
        let hub = hub_with(Arc::clone(&store));
        hub.init(job()).await.unwrap();
        hub.update(job(), downloaded(JobStatus::Downloading, 7_000))
            .await
            .unwrap();
        hub.shutdown().await;
        drop(hub);

        let hub = hub_with(store);
        let snapshot = hub.snapshot(job()).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Downloading);
        assert_eq!(snapshot.bytes_downloaded, 7_000);

        hub.update(job(), downloaded(JobStatus::Downloading, 10))
            .await
            .unwrap();
        assert_eq!(hub.snapshot(job()).await.unwrap().bytes_downloaded, 7_000);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_actor_is_evicted_and_respawned() {
        let hub = hub_with(Arc::default());
        hub.update(job(), downloaded(JobStatus::Downloading, 99))
            .await
            .unwrap();
        assert_eq!(hub.actor_count().await, 1);

        for _ in 0..61 {
            tokio::time::advance(Duration::from_secs(10)).await;
            settle().await;
        }
        assert_eq!(hub.actor_count().await, 0);

        let snapshot = hub.snapshot(job()).await.unwrap();
        assert_eq!(snapshot.bytes_downloaded, 99);
        assert_eq!(hub.actor_count().await, 1);
    }

    #[tokio::test]
    async fn shutdown_closes_streams() {
        let hub = hub_with(Arc::default());
        let mut stream = hub.subscribe(job()).await.unwrap();
        expect_snapshot(stream.recv().await);

        hub.shutdown().await;
        assert!(stream.recv().await.is_none());
    }
}
