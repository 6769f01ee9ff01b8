//! Outbound calls to fetch workers.
//!
//! The dispatcher depends on the [`WorkerClient`] trait so tests can swap in
//! a scripted fake; production uses [`HttpWorkerClient`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use fetchplane_core::types::JobId;

use crate::config::DispatchConfig;

/// Body of `POST {workerBase}/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub job_id: JobId,
    pub source_type: String,
    pub source_payload: String,
    pub callback_url: String,
    /// Key the worker signs its callbacks with.
    pub callback_credential: String,
    pub correlation_id: uuid::Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    job_id: JobId,
}

/// Error type for worker calls.
#[derive(Debug, thiserror::Error)]
pub enum WorkerCallError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The worker answered with a non-2xx status code.
    #[error("Worker returned HTTP {0}")]
    HttpStatus(u16),
}

/// Calls a worker makes available to the control plane.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Ask the worker at `base_url` to start a job. Any 2xx accepts.
    async fn start(&self, base_url: &str, request: &StartRequest) -> Result<(), WorkerCallError>;

    /// Tell the worker at `base_url` to stop working on `job_id`.
    async fn cancel(&self, base_url: &str, job_id: JobId) -> Result<(), WorkerCallError>;
}

/// [`WorkerClient`] over HTTP with per-call timeouts.
pub struct HttpWorkerClient {
    client: reqwest::Client,
    start_timeout: Duration,
    cancel_timeout: Duration,
}

impl HttpWorkerClient {
    pub fn new(config: &DispatchConfig) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            client,
            start_timeout: Duration::from_secs(config.start_timeout_secs),
            cancel_timeout: Duration::from_secs(config.cancel_timeout_secs),
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: String,
        body: &T,
        timeout: Duration,
    ) -> Result<(), WorkerCallError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WorkerCallError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn start(&self, base_url: &str, request: &StartRequest) -> Result<(), WorkerCallError> {
        self.post(endpoint(base_url, "start"), request, self.start_timeout)
            .await
    }

    async fn cancel(&self, base_url: &str, job_id: JobId) -> Result<(), WorkerCallError> {
        self.post(
            endpoint(base_url, "cancel"),
            &CancelRequest { job_id },
            self.cancel_timeout,
        )
        .await
    }
}
