//! HTTP client for the remote execution service

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use super::client::{AgentClient, JobEventSource};
use super::error::ApiError;
use super::stream::NdjsonStream;
use super::types::{ExecuteRequest, ExecuteResponse};

/// Fallback wait when a 429 arrives without a retry-after header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// reqwest-backed client for the execute service
pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl HttpAgentClient {
    /// Build a client against a service base URL
    ///
    /// The timeout applies to the execute call only. Event streams stay open
    /// for the whole job and get just the connect timeout.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(%base_url, "HttpAgentClient::new: called");
        let http = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
            timeout,
        })
    }

    /// Stream endpoint for a job known only by id
    fn job_stream_url(&self, job_id: &str) -> String {
        format!("{}/v1/executions/{}/events", self.base_url, job_id)
    }

    /// Resolve a stream URL the service handed back, absolute or relative
    fn absolutize(&self, stream_url: &str) -> String {
        if stream_url.starts_with("http://") || stream_url.starts_with("https://") {
            stream_url.to_string()
        } else {
            format!("{}/{}", self.base_url, stream_url.trim_start_matches('/'))
        }
    }
}

/// Read the retry-after header, seconds, with the service default
fn parse_retry_after(response: &reqwest::Response) -> Duration {
    let secs = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ApiError> {
        debug!(repo = %request.repo, session_id = %request.session_id, "HttpAgentClient::execute: called");
        let url = format!("{}/v1/executions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = parse_retry_after(&response);
            debug!(?retry_after, "HttpAgentClient::execute: rate limited (429)");
            return Err(ApiError::RateLimited { retry_after });
        }

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "HttpAgentClient::execute: API error");
            return Err(ApiError::Api { status, message });
        }

        let parsed: ExecuteResponse = response.json().await?;
        debug!(job_id = %parsed.job_id, "HttpAgentClient::execute: job spawned");
        Ok(parsed)
    }

    async fn open_stream(&self, stream_url: &str) -> Result<Box<dyn JobEventSource>, ApiError> {
        let url = self.absolutize(stream_url);
        debug!(%url, "HttpAgentClient::open_stream: called");

        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Api { status, message });
        }

        let chunks = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|e| e.to_string())
            .boxed();
        Ok(Box::new(NdjsonStream::new(chunks)))
    }

    async fn open_job_stream(&self, job_id: &str) -> Result<Box<dyn JobEventSource>, ApiError> {
        debug!(%job_id, "HttpAgentClient::open_job_stream: called");
        let url = self.job_stream_url(job_id);
        self.open_stream(&url).await
    }
}
