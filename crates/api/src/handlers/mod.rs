pub mod admin_jobs;
pub mod callbacks;
pub mod dlq;
pub mod fleet;
pub mod jobs;
pub mod workers;
