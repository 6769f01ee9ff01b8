//! Dispatch queue consumers.
//!
//! `DISPATCH_CONSUMERS` tasks poll `dispatch_queue`, each claiming one
//! message at a time with `FOR UPDATE SKIP LOCKED` (see
//! [`DispatchQueueRepo::claim_next`]). For every message the consumer picks
//! the least-loaded healthy worker, marks the job `metadata_fetch`, assigns
//! it, and calls the worker's start endpoint.
//!
//! A failed handoff is not acked: the message becomes visible again after
//! `2^attempt` seconds (capped) with `attempt + 1`. The delivery that would
//! reach the ceiling goes to the DLQ instead, the job is failed with the
//! causing error, and the message is acked. A state conflict (another owner,
//! or a status the handoff may not move from) is acked without retry and
//! never dead-lettered. Consumers keep no state between messages.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use fetchplane_core::audit::{actors, causes};
use fetchplane_core::callback_auth::derive_credential;
use fetchplane_core::dispatch::{decide, RetryDecision};
use fetchplane_core::job_state::TransitionOutcome;
use fetchplane_core::progress::ProgressUpdate;
use fetchplane_core::types::DbId;
use fetchplane_core::worker_pool::select_worker;
use fetchplane_db::error::JobStoreError;
use fetchplane_db::models::dispatch::{DispatchMessage, QueuedDispatch};
use fetchplane_db::models::job::{AssignOutcome, AuditContext, TransitionFields};
use fetchplane_db::models::status::JobStatus;
use fetchplane_db::repositories::{DispatchQueueRepo, DlqRepo, JobRepo, WorkerRepo};
use fetchplane_events::names;
use fetchplane_events::{EventBus, PlatformEvent};

use crate::config::DispatchConfig;
use crate::engine::progress::ProgressHub;
use crate::engine::worker_client::{StartRequest, WorkerClient};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Why a delivery did not hand the job off.
///
/// `NoCapacity` and `Transport` are retried with backoff. `StateConflict`
/// means the row moved under the consumer; it is logged, acked, and the job
/// is left as the other party put it.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No healthy worker with spare capacity")]
    NoCapacity,

    #[error("Worker start call failed: {0}")]
    Transport(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What processing a message achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// The worker accepted the start call.
    HandedOff { worker_id: DbId },
    /// Nothing to do for this job any more (terminal, missing, already
    /// running, or owned by someone else). The message is acked.
    Skipped(&'static str),
}

/// What happened to one claimed queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Acked(Processed),
    Retrying { next_attempt: i32, delay_secs: i64 },
    DeadLettered { attempts: i32 },
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Shared by all consumer tasks.
pub struct Dispatcher {
    pool: PgPool,
    worker_client: Arc<dyn WorkerClient>,
    progress_hub: Arc<ProgressHub>,
    event_bus: Arc<EventBus>,
    config: DispatchConfig,
    callback_secret: String,
    callback_url: String,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        worker_client: Arc<dyn WorkerClient>,
        progress_hub: Arc<ProgressHub>,
        event_bus: Arc<EventBus>,
        config: DispatchConfig,
        callback_secret: String,
        callback_url: String,
    ) -> Self {
        Self {
            pool,
            worker_client,
            progress_hub,
            event_bus,
            config,
            callback_secret,
            callback_url,
        }
    }

    /// Spawn `consumers` consumer tasks that run until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.consumers)
            .map(|consumer| {
                let dispatcher = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move { dispatcher.run(consumer, cancel).await })
            })
            .collect()
    }

    /// Consumer loop: drain visible messages, then sleep one poll interval.
    pub async fn run(&self, consumer: usize, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        tracing::info!(
            consumer,
            poll_interval_ms = self.config.poll_interval_ms,
            "Dispatch consumer started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(consumer, "Dispatch consumer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    while !cancel.is_cancelled() {
                        match self.poll_once().await {
                            Ok(Some(_)) => continue,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(consumer, error = %e, "Dispatch cycle failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim one visible message and settle it. `None` when the queue is idle.
    pub async fn poll_once(&self) -> Result<Option<Delivery>, sqlx::Error> {
        let Some(row) =
            DispatchQueueRepo::claim_next(&self.pool, self.config.visibility_timeout_secs).await?
        else {
            return Ok(None);
        };
        self.deliver(&row).await.map(Some)
    }

    async fn deliver(&self, row: &QueuedDispatch) -> Result<Delivery, sqlx::Error> {
        let message = row.message();

        // A lease that expired without an ack may already be past the ceiling.
        if message.attempt >= self.config.max_attempts {
            let error = row
                .last_error
                .clone()
                .unwrap_or_else(|| "Delivery lease expired without acknowledgement".into());
            self.dead_letter(row, message.attempt, &error).await?;
            return Ok(Delivery::DeadLettered {
                attempts: message.attempt,
            });
        }

        match self.process_message(&message).await {
            Ok(processed) => {
                let mut conn = self.pool.acquire().await?;
                DispatchQueueRepo::ack(&mut conn, row.id).await?;
                Ok(Delivery::Acked(processed))
            }
            Err(DispatchError::StateConflict(conflict)) => {
                tracing::error!(
                    job_id = %message.job_id,
                    correlation_id = %message.correlation_id,
                    attempt = message.attempt,
                    conflict = %conflict,
                    "Dispatch hit a state conflict, acking without retry",
                );
                let mut conn = self.pool.acquire().await?;
                DispatchQueueRepo::ack(&mut conn, row.id).await?;
                Ok(Delivery::Acked(Processed::Skipped("state conflict")))
            }
            Err(e) => {
                let error = e.to_string();
                match decide(message.attempt, self.config.max_attempts, self.config.backoff_cap_secs) {
                    RetryDecision::Redeliver {
                        next_attempt,
                        delay_secs,
                    } => {
                        tracing::warn!(
                            job_id = %message.job_id,
                            correlation_id = %message.correlation_id,
                            attempt = message.attempt,
                            next_attempt,
                            delay_secs,
                            error = %error,
                            "Dispatch failed, will redeliver",
                        );
                        DispatchQueueRepo::redeliver(
                            &self.pool,
                            row.id,
                            next_attempt,
                            delay_secs,
                            &error,
                        )
                        .await?;
                        Ok(Delivery::Retrying {
                            next_attempt,
                            delay_secs,
                        })
                    }
                    RetryDecision::DeadLetter { attempts } => {
                        self.dead_letter(row, attempts, &error).await?;
                        Ok(Delivery::DeadLettered { attempts })
                    }
                }
            }
        }
    }

    /// Hand one message's job to a worker.
    ///
    /// Returns an error without side effects on the queue; the caller owns
    /// the ack/redeliver decision.
    pub async fn process_message(&self, message: &DispatchMessage) -> Result<Processed, DispatchError> {
        let job_id = message.job_id;
        let Some(job) = JobRepo::find_by_id(&self.pool, job_id).await? else {
            tracing::warn!(job_id = %job_id, "Dispatch message for unknown job");
            return Ok(Processed::Skipped("job not found"));
        };

        let status = job.status().map_err(JobStoreError::from)?;
        if status.is_terminal() {
            tracing::info!(job_id = %job_id, status = %status, "Job already terminal, skipping dispatch");
            return Ok(Processed::Skipped("job terminal"));
        }
        if !matches!(status, JobStatus::Submitted | JobStatus::MetadataFetch) {
            tracing::info!(job_id = %job_id, status = %status, "Job already running, skipping dispatch");
            return Ok(Processed::Skipped("job already handed off"));
        }

        // Left over from a delivery whose start call never confirmed.
        if let Some(previous) = job.worker_id {
            if JobRepo::release_worker(&self.pool, job_id, previous).await? {
                WorkerRepo::release_slot(&self.pool, previous).await?;
            }
        }

        let candidates = WorkerRepo::list_candidates(&self.pool).await?;
        let chosen = select_worker(&candidates).ok_or(DispatchError::NoCapacity)?;
        let worker = WorkerRepo::find_by_id(&self.pool, chosen.id)
            .await?
            .ok_or(DispatchError::NoCapacity)?;

        match JobRepo::assign_worker(&self.pool, job_id, worker.id).await {
            Ok(AssignOutcome::Assigned) | Ok(AssignOutcome::AlreadyOwned) => {}
            Ok(AssignOutcome::JobTerminal) => return Ok(Processed::Skipped("job terminal")),
            Err(JobStoreError::AlreadyAssigned { current, .. }) => {
                return Err(DispatchError::StateConflict(format!(
                    "job {job_id} is owned by worker {current}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let audit = AuditContext {
            cause: causes::WORKER_REPORTED,
            actor: actors::DISPATCHER,
            reason: None,
        };
        match JobRepo::transition(
            &self.pool,
            job_id,
            JobStatus::MetadataFetch,
            &TransitionFields::default(),
            audit,
        )
        .await
        {
            Ok(t) if t.outcome == TransitionOutcome::NoOp => {
                // Cancelled between the status check and the transition.
                JobRepo::release_worker(&self.pool, job_id, worker.id).await?;
                return Ok(Processed::Skipped("job terminal"));
            }
            Ok(_) => {}
            Err(e) => {
                JobRepo::release_worker(&self.pool, job_id, worker.id).await?;
                return match e {
                    JobStoreError::InvalidTransition(t) => {
                        Err(DispatchError::StateConflict(t.to_string()))
                    }
                    other => Err(other.into()),
                };
            }
        }
        WorkerRepo::reserve_slot(&self.pool, worker.id).await?;

        let request = StartRequest {
            job_id,
            source_type: message.source_type.clone(),
            source_payload: message.source_payload.clone(),
            callback_url: self.callback_url.clone(),
            callback_credential: derive_credential(&self.callback_secret, job_id),
            correlation_id: message.correlation_id,
        };

        if let Err(e) = self.worker_client.start(&worker.base_url, &request).await {
            if JobRepo::release_worker(&self.pool, job_id, worker.id).await? {
                WorkerRepo::release_slot(&self.pool, worker.id).await?;
            }
            return Err(DispatchError::Transport(format!("worker {}: {e}", worker.name)));
        }

        tracing::info!(
            job_id = %job_id,
            worker_id = worker.id,
            worker = %worker.name,
            correlation_id = %message.correlation_id,
            attempt = message.attempt,
            "Job handed off to worker",
        );

        let update = ProgressUpdate {
            worker_id: Some(worker.id),
            ..ProgressUpdate::status(JobStatus::MetadataFetch)
        };
        if let Err(e) = self.progress_hub.update(job_id, update).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to push dispatch to progress actor");
        }

        self.event_bus.publish(
            PlatformEvent::new(names::JOB_DISPATCHED)
                .for_job(job_id)
                .with_actor(actors::DISPATCHER)
                .with_payload(serde_json::json!({
                    "worker_id": worker.id,
                    "attempt": message.attempt,
                    "correlation_id": message.correlation_id,
                })),
        );

        Ok(Processed::HandedOff {
            worker_id: worker.id,
        })
    }

    /// Publish to the DLQ, fail the job with the verbatim error, and ack, in
    /// one transaction.
    async fn dead_letter(
        &self,
        row: &QueuedDispatch,
        attempts: i32,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        let message = row.message();
        let payload = serde_json::to_value(&message).unwrap_or(serde_json::Value::Null);

        let mut tx = self.pool.begin().await?;
        DlqRepo::publish(&mut tx, message.job_id, &payload, attempts, error).await?;

        let fields = TransitionFields {
            error_message: Some(error.to_string()),
            ..Default::default()
        };
        let audit = AuditContext {
            cause: causes::DISPATCH_EXHAUSTED,
            actor: actors::DISPATCHER,
            reason: Some(error),
        };
        match JobRepo::transition_in(&mut tx, message.job_id, JobStatus::Failed, &fields, audit).await {
            Ok(_) | Err(JobStoreError::NotFound(_)) => {}
            Err(JobStoreError::Database(e)) => return Err(e),
            Err(e) => {
                tracing::error!(job_id = %message.job_id, error = %e, "Could not fail dead-lettered job");
            }
        }

        DispatchQueueRepo::ack(&mut tx, row.id).await?;
        tx.commit().await?;

        tracing::error!(
            job_id = %message.job_id,
            correlation_id = %message.correlation_id,
            attempts,
            error,
            "Dispatch retries exhausted, message dead-lettered",
        );

        let update = ProgressUpdate {
            error: Some(error.to_string()),
            ..ProgressUpdate::status(JobStatus::Failed)
        };
        if let Err(e) = self.progress_hub.update(message.job_id, update).await {
            tracing::error!(job_id = %message.job_id, error = %e, "Failed to push failure to progress actor");
        }

        self.event_bus.publish(
            PlatformEvent::new(names::JOB_DEAD_LETTERED)
                .for_job(message.job_id)
                .with_actor(actors::DISPATCHER)
                .with_payload(serde_json::json!({
                    "attempts": attempts,
                    "error": error,
                    "correlation_id": message.correlation_id,
                })),
        );
        Ok(())
    }
}
