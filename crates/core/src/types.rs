/// Database primary keys for workers and log tables are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Jobs are identified by an opaque UUID that is stable for their lifetime.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
