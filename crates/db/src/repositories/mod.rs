//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or `&mut PgConnection` when the caller owns the
//! transaction) as the first argument.

pub mod dispatch_queue_repo;
pub mod dlq_repo;
pub mod event_repo;
pub mod job_repo;
pub mod snapshot_repo;
pub mod worker_repo;

pub use dispatch_queue_repo::DispatchQueueRepo;
pub use dlq_repo::DlqRepo;
pub use event_repo::EventRepo;
pub use job_repo::{JobRepo, Transitioned};
pub use snapshot_repo::SnapshotRepo;
pub use worker_repo::WorkerRepo;
