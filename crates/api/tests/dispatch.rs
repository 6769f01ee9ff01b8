//! Integration tests for the dispatch queue consumer and the DLQ console.
//!
//! The consumer is driven one message at a time through
//! `Dispatcher::poll_once`, so no background tasks are involved.

mod common;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use common::{body_json, get_auth, post_json_auth, CALLBACK_SECRET, MAGNET};
use std::time::Duration;

use sqlx::PgPool;
use fetchplane_api::engine::dispatcher::{Delivery, Processed};
use fetchplane_core::callback_auth::derive_credential;
use fetchplane_core::types::JobId;
use fetchplane_db::models::status::{JobStatus, WorkerStatus};
use fetchplane_db::repositories::{DispatchQueueRepo, DlqRepo, JobRepo, SnapshotRepo, WorkerRepo};

async fn job_status(pool: &PgPool, job_id: JobId) -> JobStatus {
    JobRepo::find_by_id(pool, job_id)
        .await
        .unwrap()
        .unwrap()
        .status()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn handoff_picks_least_loaded_worker(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let busy = common::register_worker(&pool, "busy", 1, 2).await;
    let idle = common::register_worker(&pool, "idle", 0, 2).await;
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;

    let delivery = app.dispatcher().poll_once().await.unwrap();
    assert_eq!(
        delivery,
        Some(Delivery::Acked(Processed::HandedOff { worker_id: idle.id }))
    );

    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status().unwrap(), JobStatus::MetadataFetch);
    assert_eq!(job.worker_id, Some(idle.id));

    let idle = WorkerRepo::find_by_id(&pool, idle.id).await.unwrap().unwrap();
    assert_eq!(idle.active_jobs, 1);
    let busy = WorkerRepo::find_by_id(&pool, busy.id).await.unwrap().unwrap();
    assert_eq!(busy.active_jobs, 1);

    let calls = app.workers.start_calls();
    assert_eq!(calls.len(), 1);
    let (base_url, request) = &calls[0];
    assert_eq!(base_url, &idle.base_url);
    assert_eq!(request.job_id, job_id);
    assert_eq!(request.source_type, "magnet");
    assert_eq!(request.source_payload, MAGNET);
    assert_eq!(request.callback_url, "http://control.test/api/v1/callbacks/progress");
    assert_eq!(
        request.callback_credential,
        derive_credential(CALLBACK_SECRET, job_id)
    );

    // Acked: nothing left to claim.
    assert!(DispatchQueueRepo::list_for_job(&pool, job_id).await.unwrap().is_empty());
    assert_eq!(app.dispatcher().poll_once().await.unwrap(), None);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn cordoned_and_full_workers_are_never_chosen(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let cordoned = common::register_worker(&pool, "cordoned", 0, 4).await;
    WorkerRepo::set_status(&pool, cordoned.id, WorkerStatus::Cordoned, "user:9", None)
        .await
        .unwrap();
    common::register_worker(&pool, "full", 2, 2).await;
    let token = common::user_token(&app, 1);
    common::submit_magnet(&app, &token, MAGNET).await;

    let delivery = app.dispatcher().poll_once().await.unwrap();
    assert_matches!(delivery, Some(Delivery::Retrying { next_attempt: 1, .. }));
    assert!(app.workers.start_calls().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn submitted_job_has_live_progress_before_first_delivery(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let worker = common::register_worker(&pool, "w1", 0, 2).await;
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;

    // The actor exists by the time the message is claimable.
    assert_eq!(app.state.progress_hub.actor_count().await, 1);
    let snapshot = app.state.progress_hub.snapshot(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Submitted);

    app.dispatcher().poll_once().await.unwrap();
    let snapshot = app.state.progress_hub.snapshot(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::MetadataFetch);
    assert_eq!(snapshot.worker_id, Some(worker.id));

    let stored = SnapshotRepo::load(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::MetadataFetch);
    assert_eq!(stored.worker_id, Some(worker.id));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn competing_owner_is_acked_without_retry(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let rival = common::register_worker(&pool, "rival", 2, 2).await;
    common::register_worker(&pool, "w1", 0, 2).await;
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;

    // Hold the job row so the consumer blocks on assignment, then hand the
    // job to another owner before letting it through.
    let mut tx = pool.begin().await.unwrap();
    sqlx::query("SELECT id FROM jobs WHERE id = $1 FOR NO KEY UPDATE")
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .unwrap();

    let dispatcher = app.dispatcher();
    let delivery = tokio::spawn(async move { dispatcher.poll_once().await });

    loop {
        let waiting: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pg_stat_activity \
             WHERE datname = current_database() AND wait_event_type = 'Lock'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        if waiting > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    sqlx::query("UPDATE jobs SET worker_id = $2 WHERE id = $1")
        .bind(job_id)
        .bind(rival.id)
        .execute(&mut *tx)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let delivery = delivery.await.unwrap().unwrap();
    assert_eq!(
        delivery,
        Some(Delivery::Acked(Processed::Skipped("state conflict")))
    );
    assert!(app.workers.start_calls().is_empty());
    assert!(DispatchQueueRepo::list_for_job(&pool, job_id).await.unwrap().is_empty());
    assert!(DlqRepo::list_for_job(&pool, job_id).await.unwrap().is_empty());

    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status().unwrap(), JobStatus::Submitted);
    assert_eq!(job.worker_id, Some(rival.id));
}

// ---------------------------------------------------------------------------
// Retry and dead-letter
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn no_capacity_redelivers_with_backoff(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;

    let delivery = app.dispatcher().poll_once().await.unwrap();
    assert_eq!(
        delivery,
        Some(Delivery::Retrying {
            next_attempt: 1,
            delay_secs: 2,
        })
    );

    let queued = DispatchQueueRepo::list_for_job(&pool, job_id).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempt, 1);
    assert!(queued[0].last_error.as_deref().unwrap().contains("capacity"));

    // Invisible until the backoff passes.
    assert_eq!(app.dispatcher().poll_once().await.unwrap(), None);
    assert_eq!(job_status(&pool, job_id).await, JobStatus::Submitted);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn retry_ceiling_dead_letters_and_fails_job(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let worker = common::register_worker(&pool, "flaky", 0, 4).await;
    app.workers.set_failing(true);
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;
    let dispatcher = app.dispatcher();

    for expected_next in 1..=4 {
        let delivery = dispatcher.poll_once().await.unwrap();
        assert_matches!(
            delivery,
            Some(Delivery::Retrying { next_attempt, .. }) if next_attempt == expected_next
        );
        // Each failed start releases what it reserved.
        let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
        assert_eq!(job.worker_id, None);
        common::expire_backoff(&pool).await;
    }

    let delivery = dispatcher.poll_once().await.unwrap();
    assert_eq!(delivery, Some(Delivery::DeadLettered { attempts: 5 }));
    assert_eq!(app.workers.start_calls().len(), 5);

    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status().unwrap(), JobStatus::Failed);
    let expected_error = "Worker start call failed: worker flaky: Worker returned HTTP 503";
    assert_eq!(job.error_message.as_deref(), Some(expected_error));

    let worker = WorkerRepo::find_by_id(&pool, worker.id).await.unwrap().unwrap();
    assert_eq!(worker.active_jobs, 0);

    let entries = DlqRepo::list_for_job(&pool, job_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 5);
    assert_eq!(entries[0].last_error, expected_error);
    assert_eq!(entries[0].message["jobId"], job_id.to_string());

    let audit = JobRepo::audit_log(&pool, job_id).await.unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.cause, "dispatch_exhausted");
    assert_eq!(last.actor, "dispatcher");
    assert_eq!(last.reason.as_deref(), Some(expected_error));

    assert!(DispatchQueueRepo::list_for_job(&pool, job_id).await.unwrap().is_empty());

    let snapshot = app.state.progress_hub.snapshot(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some(expected_error));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn success_below_ceiling_dispatches_without_dlq(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let worker = common::register_worker(&pool, "flaky", 0, 4).await;
    app.workers.set_failing(true);
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;
    let dispatcher = app.dispatcher();

    for expected_next in 1..=4 {
        let delivery = dispatcher.poll_once().await.unwrap();
        assert_matches!(
            delivery,
            Some(Delivery::Retrying { next_attempt, .. }) if next_attempt == expected_next
        );
        common::expire_backoff(&pool).await;
    }

    // The fifth delivery is the last one allowed, and it succeeds.
    app.workers.set_failing(false);
    let delivery = dispatcher.poll_once().await.unwrap();
    assert_eq!(
        delivery,
        Some(Delivery::Acked(Processed::HandedOff { worker_id: worker.id }))
    );
    assert_eq!(app.workers.start_calls().len(), 5);

    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status().unwrap(), JobStatus::MetadataFetch);
    assert_eq!(job.worker_id, Some(worker.id));
    assert_eq!(job.error_message, None);

    assert!(DlqRepo::list_for_job(&pool, job_id).await.unwrap().is_empty());
    assert!(DispatchQueueRepo::list_for_job(&pool, job_id).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn terminal_job_is_skipped_and_acked(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    common::register_worker(&pool, "w1", 0, 2).await;
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;

    let uri = format!("/api/v1/jobs/{job_id}/cancel");
    post_json_auth(app.router(), &uri, serde_json::json!({}), &token).await;

    let delivery = app.dispatcher().poll_once().await.unwrap();
    assert_eq!(delivery, Some(Delivery::Acked(Processed::Skipped("job terminal"))));
    assert!(app.workers.start_calls().is_empty());
    assert!(DispatchQueueRepo::list_for_job(&pool, job_id).await.unwrap().is_empty());
    assert_eq!(job_status(&pool, job_id).await, JobStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// DLQ console
// ---------------------------------------------------------------------------

async fn dead_letter_one(app: &common::TestApp, pool: &PgPool) -> JobId {
    let token = common::user_token(app, 1);
    let job_id = common::submit_magnet(app, &token, MAGNET).await;
    let dispatcher = app.dispatcher();
    loop {
        match dispatcher.poll_once().await.unwrap() {
            Some(Delivery::DeadLettered { .. }) => break,
            Some(_) => common::expire_backoff(pool).await,
            None => panic!("queue drained before dead-lettering"),
        }
    }
    job_id
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn replay_resets_job_and_reenqueues(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let job_id = dead_letter_one(&app, &pool).await;
    let admin = common::admin_token(&app, 99);

    let listed = body_json(get_auth(app.router(), "/api/v1/admin/dlq", &admin).await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let uri = format!("/api/v1/admin/dlq/{job_id}/replay");
    let body = serde_json::json!({ "reason": "worker pool restored", "ticket": "OPS-1234" });
    let response = post_json_auth(app.router(), &uri, body, &admin).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["job"]["status"], "submitted");
    assert_eq!(json["data"]["entry"]["replay_ticket"], "OPS-1234");

    let queued = DispatchQueueRepo::list_for_job(&pool, job_id).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempt, 0);

    let audit = JobRepo::audit_log(&pool, job_id).await.unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.cause, "operator_replay");
    assert_eq!(last.actor, "user:99");

    // The entry is no longer pending.
    let response = post_json_auth(
        app.router(),
        &uri,
        serde_json::json!({ "reason": "again", "ticket": "OPS-1235" }),
        &admin,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A worker is back: the replayed message is handed off normally.
    common::register_worker(&pool, "w1", 0, 2).await;
    let delivery = app.dispatcher().poll_once().await.unwrap();
    assert_matches!(delivery, Some(Delivery::Acked(Processed::HandedOff { .. })));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn replay_discards_failed_progress(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let job_id = dead_letter_one(&app, &pool).await;
    let admin = common::admin_token(&app, 99);

    let uri = format!("/api/v1/admin/dlq/{job_id}/replay");
    let body = serde_json::json!({ "reason": "worker pool restored", "ticket": "OPS-77" });
    let response = post_json_auth(app.router(), &uri, body, &admin).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(SnapshotRepo::load(&pool, job_id).await.unwrap(), None);
    let snapshot = app.state.progress_hub.snapshot(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Submitted);
    assert_eq!(snapshot.error, None);

    // A reload after eviction rebuilds from the reset job row.
    app.state.progress_hub.evict(job_id).await;
    let snapshot = app.state.progress_hub.snapshot(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Submitted);
    assert_eq!(snapshot.error, None);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn replay_requires_reason_and_ticket(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let job_id = dead_letter_one(&app, &pool).await;
    let admin = common::admin_token(&app, 99);
    let uri = format!("/api/v1/admin/dlq/{job_id}/replay");

    let blank_reason = serde_json::json!({ "reason": "   ", "ticket": "OPS-1" });
    let response = post_json_auth(app.router(), &uri, blank_reason, &admin).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let no_ticket = serde_json::json!({ "reason": "retry" });
    let response = post_json_auth(app.router(), &uri, no_ticket, &admin).await;
    assert!(response.status().is_client_error());

    assert_eq!(job_status(&pool, job_id).await, JobStatus::Failed);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn replay_without_pending_entry_is_404(pool: PgPool) {
    let app = common::build_test_app(pool);
    let token = common::user_token(&app, 1);
    let job_id = common::submit_magnet(&app, &token, MAGNET).await;
    let admin = common::admin_token(&app, 99);

    let uri = format!("/api/v1/admin/dlq/{job_id}/replay");
    let body = serde_json::json!({ "reason": "retry", "ticket": "OPS-1" });
    let response = post_json_auth(app.router(), &uri, body, &admin).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get_auth(app.router(), &format!("/api/v1/admin/dlq/{job_id}"), &admin).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn dlq_console_is_admin_only(pool: PgPool) {
    let app = common::build_test_app(pool);
    let token = common::user_token(&app, 1);

    let response = get_auth(app.router(), "/api/v1/admin/dlq", &token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
