//! AgentClient trait definition

use async_trait::async_trait;
#[allow(unused_imports)]
use tracing::debug;

use super::error::ApiError;
use super::types::{ExecuteRequest, ExecuteResponse, JobEvent};

/// One job's event stream, consumed frame by frame
///
/// Dropping the source closes the underlying connection. That is the only
/// control channel the client has over a running job: the stream is one-way
/// and there is no cancel call.
#[async_trait]
pub trait JobEventSource: Send {
    /// Next frame, None once the stream has cleanly ended
    async fn next_event(&mut self) -> Option<Result<JobEvent, ApiError>>;
}

/// Client for the remote execution service
///
/// Every call is independent: `execute` spawns a job and hands back a stream
/// handle, `open_stream` connects to it. Reattachment after the handle is
/// gone goes through `open_job_stream`, which only needs the job id.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Spawn a remote execution job
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ApiError>;

    /// Connect to a job's event stream by the URL `execute` returned
    async fn open_stream(&self, stream_url: &str) -> Result<Box<dyn JobEventSource>, ApiError>;

    /// Connect to a job's event stream knowing only its id
    async fn open_job_stream(&self, job_id: &str) -> Result<Box<dyn JobEventSource>, ApiError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::debug;

    /// Mock agent client for unit tests
    ///
    /// Scripts are consumed in order: the nth `execute` hands out job-n, and
    /// the nth stream open replays the nth script.
    pub struct MockAgentClient {
        scripts: Mutex<VecDeque<Vec<Result<JobEvent, ApiError>>>>,
        execute_errors: Mutex<VecDeque<ApiError>>,
        requests: Mutex<Vec<ExecuteRequest>>,
        execute_calls: AtomicUsize,
        stream_opens: AtomicUsize,
        hang_when_drained: bool,
    }

    impl MockAgentClient {
        pub fn new() -> Self {
            Self {
                scripts: Mutex::new(VecDeque::new()),
                execute_errors: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                execute_calls: AtomicUsize::new(0),
                stream_opens: AtomicUsize::new(0),
                hang_when_drained: false,
            }
        }

        /// Queue a job whose stream replays these events
        pub fn with_job(self, events: Vec<JobEvent>) -> Self {
            self.with_job_frames(events.into_iter().map(Ok).collect())
        }

        /// Queue a job whose stream replays these frames, errors included
        pub fn with_job_frames(self, frames: Vec<Result<JobEvent, ApiError>>) -> Self {
            self.scripts.lock().unwrap().push_back(frames);
            self
        }

        /// Queue an error for the next execute call (consumed once)
        pub fn with_execute_error(self, error: ApiError) -> Self {
            self.execute_errors.lock().unwrap().push_back(error);
            self
        }

        /// Streams hang forever after draining instead of ending
        pub fn hanging(mut self) -> Self {
            self.hang_when_drained = true;
            self
        }

        pub fn execute_calls(&self) -> usize {
            self.execute_calls.load(Ordering::SeqCst)
        }

        pub fn stream_opens(&self) -> usize {
            self.stream_opens.load(Ordering::SeqCst)
        }

        /// Requests seen so far, in call order
        pub fn requests(&self) -> Vec<ExecuteRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentClient for MockAgentClient {
        async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ApiError> {
            debug!("MockAgentClient::execute: called");
            self.requests.lock().unwrap().push(request);
            if let Some(error) = self.execute_errors.lock().unwrap().pop_front() {
                return Err(error);
            }
            let n = self.execute_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ExecuteResponse {
                job_id: format!("job-{}", n),
                stream_url: format!("mock://job-{}", n),
            })
        }

        async fn open_stream(&self, stream_url: &str) -> Result<Box<dyn JobEventSource>, ApiError> {
            debug!(%stream_url, "MockAgentClient::open_stream: called");
            self.stream_opens.fetch_add(1, Ordering::SeqCst);
            let frames = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::new(MockEventSource {
                frames: frames.into(),
                hang_when_drained: self.hang_when_drained,
            }))
        }

        async fn open_job_stream(&self, job_id: &str) -> Result<Box<dyn JobEventSource>, ApiError> {
            debug!(%job_id, "MockAgentClient::open_job_stream: called");
            self.open_stream(&format!("mock://{}", job_id)).await
        }
    }

    /// Event source replaying a scripted frame list
    pub struct MockEventSource {
        frames: VecDeque<Result<JobEvent, ApiError>>,
        hang_when_drained: bool,
    }

    #[async_trait]
    impl JobEventSource for MockEventSource {
        async fn next_event(&mut self) -> Option<Result<JobEvent, ApiError>> {
            match self.frames.pop_front() {
                Some(frame) => Some(frame),
                None if self.hang_when_drained => futures::future::pending().await,
                None => None,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_hands_out_sequential_jobs() {
            let client = MockAgentClient::new()
                .with_job(vec![JobEvent::Result {
                    success: true,
                    pr_url: None,
                    commit_sha: None,
                    files_changed: None,
                    cost_usd: None,
                    duration_ms: None,
                }])
                .with_job(vec![]);

            let request = ExecuteRequest {
                repo: "acme/api".into(),
                branch: "main".into(),
                prompt: "p".into(),
                session_id: "s".into(),
            };

            let first = client.execute(request.clone()).await.unwrap();
            assert_eq!(first.job_id, "job-1");
            let second = client.execute(request).await.unwrap();
            assert_eq!(second.job_id, "job-2");
            assert_eq!(client.execute_calls(), 2);
            assert_eq!(client.requests().len(), 2);

            let mut stream = client.open_stream(&first.stream_url).await.unwrap();
            assert!(stream.next_event().await.unwrap().unwrap().is_terminal());
            assert!(stream.next_event().await.is_none());
        }

        #[tokio::test]
        async fn test_mock_execute_error_consumed_once() {
            let client = MockAgentClient::new().with_execute_error(ApiError::RateLimited {
                retry_after: std::time::Duration::from_secs(1),
            });

            let request = ExecuteRequest {
                repo: "acme/api".into(),
                branch: "main".into(),
                prompt: "p".into(),
                session_id: "s".into(),
            };

            assert!(client.execute(request.clone()).await.is_err());
            assert!(client.execute(request).await.is_ok());
        }
    }
}
