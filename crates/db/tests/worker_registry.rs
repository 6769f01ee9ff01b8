//! Integration tests for the worker registry and heartbeat handling.

use sqlx::PgPool;
use fetchplane_db::models::status::WorkerStatus;
use fetchplane_db::models::worker::WorkerHeartbeat;
use fetchplane_db::repositories::WorkerRepo;

fn heartbeat(name: &str, active_jobs: i32, max_jobs: i32) -> WorkerHeartbeat {
    WorkerHeartbeat {
        name: name.to_string(),
        base_url: format!("http://{name}.internal:8080"),
        active_jobs,
        max_jobs,
        cpu_percent: None,
        memory_percent: None,
        disk_free_bytes: None,
        bandwidth_bps: Some(125_000_000),
        version: None,
    }
}

async fn force_status(pool: &PgPool, id: i64, status: WorkerStatus) {
    sqlx::query("UPDATE workers SET status_id = $2 WHERE id = $1")
        .bind(id)
        .bind(status.id())
        .execute(pool)
        .await
        .unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn first_heartbeat_registers_healthy(pool: PgPool) {
    let recorded = WorkerRepo::heartbeat(&pool, &heartbeat("w1", 0, 4)).await.unwrap();
    assert!(recorded.registered);
    assert!(!recorded.reinstated);
    assert_eq!(recorded.worker.status().unwrap(), WorkerStatus::Healthy);
    assert!(recorded.worker.last_heartbeat_at.is_some());

    let samples: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM worker_heartbeats WHERE worker_id = $1")
            .bind(recorded.worker.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(samples.0, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn heartbeat_reinstates_offline_worker(pool: PgPool) {
    let w = WorkerRepo::heartbeat(&pool, &heartbeat("w1", 0, 4)).await.unwrap().worker;
    force_status(&pool, w.id, WorkerStatus::Offline).await;

    let recorded = WorkerRepo::heartbeat(&pool, &heartbeat("w1", 1, 4)).await.unwrap();
    assert!(recorded.reinstated);
    assert_eq!(recorded.worker.status().unwrap(), WorkerStatus::Healthy);
    assert_eq!(recorded.worker.active_jobs, 1);

    let log = WorkerRepo::health_log(&pool, w.id, 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].from_status_id, Some(WorkerStatus::Offline.id()));
    assert_eq!(log[0].to_status_id, WorkerStatus::Healthy.id());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn heartbeat_never_overrides_operator_status(pool: PgPool) {
    let w = WorkerRepo::heartbeat(&pool, &heartbeat("w1", 0, 4)).await.unwrap().worker;

    for status in [WorkerStatus::Cordoned, WorkerStatus::Draining] {
        WorkerRepo::set_status(&pool, w.id, status, "user:1", Some("maintenance"))
            .await
            .unwrap();
        let recorded = WorkerRepo::heartbeat(&pool, &heartbeat("w1", 0, 4)).await.unwrap();
        assert_eq!(recorded.worker.status().unwrap(), status);
        assert!(!recorded.reinstated);
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn candidates_exclude_full_and_unhealthy(pool: PgPool) {
    let idle = WorkerRepo::heartbeat(&pool, &heartbeat("idle", 0, 4)).await.unwrap().worker;
    WorkerRepo::heartbeat(&pool, &heartbeat("full", 2, 2)).await.unwrap();
    let cordoned = WorkerRepo::heartbeat(&pool, &heartbeat("cordoned", 0, 4)).await.unwrap().worker;
    WorkerRepo::set_status(&pool, cordoned.id, WorkerStatus::Cordoned, "user:1", None)
        .await
        .unwrap();

    let candidates = WorkerRepo::list_candidates(&pool).await.unwrap();
    let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![idle.id]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn set_status_logs_only_real_changes(pool: PgPool) {
    let w = WorkerRepo::heartbeat(&pool, &heartbeat("w1", 0, 4)).await.unwrap().worker;

    WorkerRepo::set_status(&pool, w.id, WorkerStatus::Draining, "user:1", None)
        .await
        .unwrap();
    WorkerRepo::set_status(&pool, w.id, WorkerStatus::Draining, "user:1", None)
        .await
        .unwrap();

    let log = WorkerRepo::health_log(&pool, w.id, 10).await.unwrap();
    assert_eq!(log.len(), 1);

    assert!(WorkerRepo::set_status(&pool, 9_999, WorkerStatus::Cordoned, "user:1", None)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn retention_prunes_old_samples(pool: PgPool) {
    let w = WorkerRepo::heartbeat(&pool, &heartbeat("w1", 0, 4)).await.unwrap().worker;
    sqlx::query("UPDATE worker_heartbeats SET recorded_at = NOW() - INTERVAL '2 days' WHERE worker_id = $1")
        .bind(w.id)
        .execute(&pool)
        .await
        .unwrap();
    WorkerRepo::heartbeat(&pool, &heartbeat("w1", 0, 4)).await.unwrap();

    let cutoff = chrono::Utc::now() - chrono::Duration::hours(24);
    let removed = WorkerRepo::delete_samples_older_than(&pool, cutoff).await.unwrap();
    assert_eq!(removed, 1);
}
