//! Worker progress callback ingress.
//!
//! Signature checks happen in the [`SignedCallback`] extractor. Here the
//! callback is deduplicated on `seq`, applied to the job record, and then
//! forwarded to the job's progress actor. Callbacks aimed at terminal jobs
//! are acknowledged without touching anything.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use fetchplane_core::audit::{actors, causes};
use fetchplane_core::job_state::TransitionOutcome;
use fetchplane_core::types::JobId;
use fetchplane_db::models::job::AuditContext;
use fetchplane_db::models::status::JobStatus;
use fetchplane_db::repositories::JobRepo;

use crate::error::AppResult;
use crate::middleware::callback_auth::SignedCallback;
use crate::response::DataResponse;
use crate::state::AppState;

/// What the control plane did with a callback.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub job_id: JobId,
    /// Job status after the callback.
    pub status: JobStatus,
    /// `false` for duplicates and callbacks on terminal jobs.
    pub applied: bool,
    pub duplicate: bool,
}

/// POST /api/v1/callbacks/progress
pub async fn progress_callback(
    State(state): State<AppState>,
    SignedCallback(callback): SignedCallback,
) -> AppResult<impl IntoResponse> {
    let job_id = callback.job_id;

    if let Some(seq) = callback.seq {
        if !state.callback_dedup.first_seen(job_id, seq).await {
            tracing::debug!(job_id = %job_id, seq, "Duplicate progress callback dropped");
            return Ok(Json(DataResponse {
                data: CallbackAck {
                    job_id,
                    status: callback.status,
                    applied: false,
                    duplicate: true,
                },
            }));
        }
    }

    let audit = AuditContext {
        cause: causes::WORKER_REPORTED,
        actor: actors::WORKER,
        reason: callback.error.as_deref(),
    };
    let transitioned = match JobRepo::transition(
        &state.pool,
        job_id,
        callback.status,
        &callback.transition_fields(),
        audit,
    )
    .await
    {
        Ok(t) => t,
        Err(e) => {
            // Let the worker's retry of the same seq through.
            if let Some(seq) = callback.seq {
                state.callback_dedup.forget(job_id, seq).await;
            }
            return Err(e.into());
        }
    };

    let status = transitioned.job.status()?;
    if transitioned.outcome == TransitionOutcome::NoOp {
        tracing::debug!(
            job_id = %job_id,
            status = %status,
            reported = %callback.status,
            "Callback for terminal job ignored",
        );
        return Ok(Json(DataResponse {
            data: CallbackAck {
                job_id,
                status,
                applied: false,
                duplicate: false,
            },
        }));
    }

    if transitioned.previous != status {
        tracing::info!(
            job_id = %job_id,
            from = %transitioned.previous,
            to = %status,
            worker_id = ?transitioned.job.worker_id,
            "Job status reported by worker",
        );
    }

    if let Err(e) = state
        .progress_hub
        .update(job_id, callback.progress_update(transitioned.job.worker_id))
        .await
    {
        // The row moved but the actor never saw it; the retry must get through.
        if let Some(seq) = callback.seq {
            state.callback_dedup.forget(job_id, seq).await;
        }
        return Err(e.into());
    }

    Ok(Json(DataResponse {
        data: CallbackAck {
            job_id,
            status,
            applied: true,
            duplicate: false,
        },
    }))
}
