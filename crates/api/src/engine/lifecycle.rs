//! Operator- and user-initiated terminal moves.
//!
//! Cancel and force-fail share one path: transition the job record, push
//! the new status to the progress actor, publish an event, and tell the
//! owning worker to stop. The worker call runs detached and its failure is
//! only logged; the job record is already terminal and later callbacks for
//! it are no-ops.

use std::sync::Arc;

use fetchplane_core::job_state::TransitionOutcome;
use fetchplane_core::progress::ProgressUpdate;
use fetchplane_core::types::{DbId, JobId};
use fetchplane_db::models::job::{AuditContext, Job, TransitionFields};
use fetchplane_db::models::status::JobStatus;
use fetchplane_db::repositories::{JobRepo, WorkerRepo};
use fetchplane_db::DbPool;
use fetchplane_events::names;
use fetchplane_events::PlatformEvent;

use crate::engine::worker_client::WorkerClient;
use crate::error::AppResult;
use crate::state::AppState;

/// Cancel a job. Cancelling a job that is already terminal returns it
/// unchanged.
pub async fn cancel_job(
    state: &AppState,
    job_id: JobId,
    cause: &str,
    actor: &str,
    reason: Option<&str>,
) -> AppResult<Job> {
    terminate(
        state,
        job_id,
        JobStatus::Cancelled,
        TransitionFields::default(),
        AuditContext {
            cause,
            actor,
            reason,
        },
        names::JOB_CANCELLED,
    )
    .await
}

/// Force a job into `failed`, recording `reason` as its error message.
pub async fn force_fail(
    state: &AppState,
    job_id: JobId,
    cause: &str,
    actor: &str,
    reason: &str,
) -> AppResult<Job> {
    let fields = TransitionFields {
        error_message: Some(reason.to_string()),
        ..Default::default()
    };
    terminate(
        state,
        job_id,
        JobStatus::Failed,
        fields,
        AuditContext {
            cause,
            actor,
            reason: Some(reason),
        },
        names::JOB_FORCE_FAILED,
    )
    .await
}

async fn terminate(
    state: &AppState,
    job_id: JobId,
    to: JobStatus,
    fields: TransitionFields,
    audit: AuditContext<'_>,
    event_type: &str,
) -> AppResult<Job> {
    let transitioned = JobRepo::transition(&state.pool, job_id, to, &fields, audit).await?;
    if transitioned.outcome == TransitionOutcome::NoOp {
        tracing::debug!(job_id = %job_id, status = %transitioned.previous, "Job already terminal");
        return Ok(transitioned.job);
    }

    let job = transitioned.job;
    tracing::info!(
        job_id = %job_id,
        from = %transitioned.previous,
        to = %to,
        cause = audit.cause,
        actor = audit.actor,
        "Job terminated",
    );

    let update = ProgressUpdate {
        error: fields.error_message.clone(),
        ..ProgressUpdate::status(to)
    };
    if let Err(e) = state.progress_hub.update(job_id, update).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to push termination to progress actor");
    }

    state.event_bus.publish(
        PlatformEvent::new(event_type)
            .for_job(job_id)
            .with_actor(audit.actor)
            .with_payload(serde_json::json!({
                "from": transitioned.previous,
                "cause": audit.cause,
                "reason": audit.reason,
            })),
    );

    if let Some(worker_id) = job.worker_id {
        notify_worker(
            state.pool.clone(),
            Arc::clone(&state.worker_client),
            worker_id,
            job_id,
        );
    }

    Ok(job)
}

/// Best-effort `POST {base}/cancel` on a detached task.
fn notify_worker(
    pool: DbPool,
    worker_client: Arc<dyn WorkerClient>,
    worker_id: DbId,
    job_id: JobId,
) {
    tokio::spawn(async move {
        let worker = match WorkerRepo::find_by_id(&pool, worker_id).await {
            Ok(Some(worker)) => worker,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(worker_id, job_id = %job_id, error = %e, "Could not look up worker for cancel");
                return;
            }
        };
        match worker_client.cancel(&worker.base_url, job_id).await {
            Ok(()) => tracing::info!(worker_id, job_id = %job_id, "Worker told to stop job"),
            Err(e) => {
                tracing::warn!(worker_id, job_id = %job_id, error = %e, "Worker cancel call failed")
            }
        }
    });
}
