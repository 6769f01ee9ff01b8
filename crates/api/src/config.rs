use fetchplane_core::dispatch::{MAX_BACKOFF_SECS, MAX_DISPATCH_ATTEMPTS};
use fetchplane_core::progress::{STALE_AFTER_SECS, STALE_CHECK_INTERVAL_SECS};

use crate::auth::jwt::JwtConfig;

/// Read `key` from the environment, falling back to `default`, and parse it.
///
/// Panics with a message naming the variable when the value does not parse.
fn env_or<T>(key: &str, default: &str) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid {}: {e}", std::any::type_name::<T>()))
}

/// Server configuration loaded from environment variables.
///
/// All fields except the secrets have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for each background task (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// JWT validation settings. Tokens are issued by the auth service.
    pub jwt: JwtConfig,
    /// Externally reachable base URL of this service, used to build the
    /// callback URL handed to workers.
    pub public_base_url: String,
    /// Server secret from which per-job callback credentials are derived.
    pub callback_secret: String,
    /// Shared bearer secret workers present on heartbeats.
    pub worker_heartbeat_secret: String,
    /// Window during which a completed job still blocks resubmission of the
    /// same source (default: 24h).
    pub dedup_window_secs: i64,
    /// Age after which an undispatched `submitted` job expires (default: `24`).
    pub job_expiry_hours: i64,
    /// Retention for worker heartbeat samples (default: `24`).
    pub heartbeat_retention_hours: i64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                    |
    /// |-----------------------------|----------------------------|
    /// | `HOST`                      | `0.0.0.0`                  |
    /// | `PORT`                      | `3000`                     |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `10`                       |
    /// | `PUBLIC_BASE_URL`           | `http://localhost:3000`    |
    /// | `CALLBACK_SECRET`           | **required**               |
    /// | `WORKER_HEARTBEAT_SECRET`   | **required**               |
    /// | `DEDUP_WINDOW_SECS`         | `86400`                    |
    /// | `JOB_EXPIRY_HOURS`          | `24`                       |
    /// | `HEARTBEAT_RETENTION_HOURS` | `24`                       |
    ///
    /// # Panics
    ///
    /// Panics if a required secret is missing or a value does not parse.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("PORT", "3000");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .trim_end_matches('/')
            .to_string();

        let callback_secret =
            std::env::var("CALLBACK_SECRET").expect("CALLBACK_SECRET must be set in the environment");
        assert!(!callback_secret.is_empty(), "CALLBACK_SECRET must not be empty");

        let worker_heartbeat_secret = std::env::var("WORKER_HEARTBEAT_SECRET")
            .expect("WORKER_HEARTBEAT_SECRET must be set in the environment");
        assert!(
            !worker_heartbeat_secret.is_empty(),
            "WORKER_HEARTBEAT_SECRET must not be empty"
        );

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", "30"),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", "10"),
            jwt: JwtConfig::from_env(),
            public_base_url,
            callback_secret,
            worker_heartbeat_secret,
            dedup_window_secs: env_or("DEDUP_WINDOW_SECS", "86400"),
            job_expiry_hours: env_or("JOB_EXPIRY_HOURS", "24"),
            heartbeat_retention_hours: env_or("HEARTBEAT_RETENTION_HOURS", "24"),
        }
    }

    /// URL workers POST progress callbacks to.
    pub fn callback_url(&self) -> String {
        format!("{}/api/v1/callbacks/progress", self.public_base_url)
    }
}

/// Dispatcher and worker-client settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of parallel queue consumers.
    pub consumers: usize,
    /// Delivery attempts before a message is dead-lettered.
    pub max_attempts: i32,
    /// Sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// Lease on a claimed message. Must outlast the start call.
    pub visibility_timeout_secs: u64,
    /// Timeout on the worker start call.
    pub start_timeout_secs: u64,
    /// Timeout on the best-effort cancel notification.
    pub cancel_timeout_secs: u64,
    /// Upper bound on the redelivery backoff.
    pub backoff_cap_secs: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            consumers: 4,
            max_attempts: MAX_DISPATCH_ATTEMPTS,
            poll_interval_ms: 500,
            visibility_timeout_secs: 30,
            start_timeout_secs: 10,
            cancel_timeout_secs: 5,
            backoff_cap_secs: MAX_BACKOFF_SECS,
        }
    }
}

impl DispatchConfig {
    /// | Env Var                        | Default |
    /// |--------------------------------|---------|
    /// | `DISPATCH_CONSUMERS`           | `4`     |
    /// | `DISPATCH_MAX_ATTEMPTS`        | `5`     |
    /// | `DISPATCH_POLL_INTERVAL_MS`    | `500`   |
    /// | `DISPATCH_VISIBILITY_SECS`     | `30`    |
    /// | `WORKER_START_TIMEOUT_SECS`    | `10`    |
    /// | `WORKER_CANCEL_TIMEOUT_SECS`   | `5`     |
    /// | `DISPATCH_BACKOFF_CAP_SECS`    | `60`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            consumers: env_or("DISPATCH_CONSUMERS", &defaults.consumers.to_string()),
            max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", &defaults.max_attempts.to_string()),
            poll_interval_ms: env_or(
                "DISPATCH_POLL_INTERVAL_MS",
                &defaults.poll_interval_ms.to_string(),
            ),
            visibility_timeout_secs: env_or(
                "DISPATCH_VISIBILITY_SECS",
                &defaults.visibility_timeout_secs.to_string(),
            ),
            start_timeout_secs: env_or(
                "WORKER_START_TIMEOUT_SECS",
                &defaults.start_timeout_secs.to_string(),
            ),
            cancel_timeout_secs: env_or(
                "WORKER_CANCEL_TIMEOUT_SECS",
                &defaults.cancel_timeout_secs.to_string(),
            ),
            backoff_cap_secs: env_or(
                "DISPATCH_BACKOFF_CAP_SECS",
                &defaults.backoff_cap_secs.to_string(),
            ),
        };

        assert!(config.consumers > 0, "DISPATCH_CONSUMERS must be at least 1");
        assert!(config.max_attempts > 0, "DISPATCH_MAX_ATTEMPTS must be at least 1");
        assert!(
            config.visibility_timeout_secs > config.start_timeout_secs,
            "DISPATCH_VISIBILITY_SECS must exceed WORKER_START_TIMEOUT_SECS"
        );
        config
    }
}

/// Progress actor settings.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Silence after which an active job is flagged stale.
    pub stale_after_secs: u64,
    /// Staleness check period.
    pub check_interval_secs: u64,
    /// An actor with no subscribers and no traffic for this long is evicted.
    pub idle_evict_secs: u64,
    /// Per-subscriber buffer. A subscriber that falls this far behind is dropped.
    pub subscriber_buffer: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: STALE_AFTER_SECS,
            check_interval_secs: STALE_CHECK_INTERVAL_SECS,
            idle_evict_secs: 600,
            subscriber_buffer: 64,
        }
    }
}

impl ProgressConfig {
    /// | Env Var                       | Default |
    /// |-------------------------------|---------|
    /// | `PROGRESS_STALE_AFTER_SECS`   | `30`    |
    /// | `PROGRESS_CHECK_INTERVAL_SECS`| `10`    |
    /// | `PROGRESS_IDLE_EVICT_SECS`    | `600`   |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            stale_after_secs: env_or(
                "PROGRESS_STALE_AFTER_SECS",
                &defaults.stale_after_secs.to_string(),
            ),
            check_interval_secs: env_or(
                "PROGRESS_CHECK_INTERVAL_SECS",
                &defaults.check_interval_secs.to_string(),
            ),
            idle_evict_secs: env_or(
                "PROGRESS_IDLE_EVICT_SECS",
                &defaults.idle_evict_secs.to_string(),
            ),
            subscriber_buffer: defaults.subscriber_buffer,
        };
        assert!(
            config.check_interval_secs > 0,
            "PROGRESS_CHECK_INTERVAL_SECS must be at least 1"
        );
        config
    }
}
