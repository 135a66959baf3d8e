//! NDJSON event stream reader
//!
//! The execute service pushes newline-delimited JSON frames over a plain GET
//! body. Frames can arrive split across transport chunks; blank lines and the
//! literal heartbeat keep-alive are skipped without touching the JSON parser;
//! malformed frames are logged and dropped rather than killing the stream.
//! The transport ending before a terminal frame is a connection loss.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::debug;

use super::client::JobEventSource;
use super::error::ApiError;
use super::types::{HEARTBEAT, JobEvent};

/// Transport chunks feeding the decoder, already detached from HTTP types
pub type ByteChunks = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

/// Line decoder over a chunked byte stream
pub struct NdjsonStream {
    inner: ByteChunks,
    buffer: String,
    saw_terminal: bool,
}

impl NdjsonStream {
    pub fn new(inner: ByteChunks) -> Self {
        Self {
            inner,
            buffer: String::new(),
            saw_terminal: false,
        }
    }

    /// Pop the next complete line out of the buffer
    fn take_line(&mut self) -> Option<String> {
        let idx = self.buffer.find('\n')?;
        let line = self.buffer[..idx].trim().to_string();
        self.buffer.drain(..=idx);
        Some(line)
    }
}

/// Decode one line, None for keep-alives and frames we cannot read
fn parse_line(line: &str) -> Option<JobEvent> {
    if line.is_empty() || line == HEARTBEAT {
        return None;
    }
    match serde_json::from_str::<JobEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, line, "parse_line: skipping malformed frame");
            None
        }
    }
}

#[async_trait]
impl JobEventSource for NdjsonStream {
    async fn next_event(&mut self) -> Option<Result<JobEvent, ApiError>> {
        loop {
            while let Some(line) = self.take_line() {
                if let Some(event) = parse_line(&line) {
                    if event.is_terminal() {
                        self.saw_terminal = true;
                    }
                    return Some(Ok(event));
                }
            }
            match self.inner.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                Some(Err(e)) => {
                    self.saw_terminal = true;
                    return Some(Err(ApiError::ConnectionLost(e)));
                }
                None => {
                    // Flush a trailing line that arrived without its newline
                    let rest = self.buffer.trim().to_string();
                    self.buffer.clear();
                    if !rest.is_empty() {
                        if let Some(event) = parse_line(&rest) {
                            if event.is_terminal() {
                                self.saw_terminal = true;
                            }
                            return Some(Ok(event));
                        }
                    }
                    if self.saw_terminal {
                        return None;
                    }
                    self.saw_terminal = true;
                    return Some(Err(ApiError::ConnectionLost(
                        "stream ended before a terminal event".into(),
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<&[u8]>) -> ByteChunks {
        let items: Vec<Result<Vec<u8>, String>> = parts.into_iter().map(|p| Ok(p.to_vec())).collect();
        futures::stream::iter(items).boxed()
    }

    async fn drain(stream: &mut NdjsonStream) -> Vec<Result<JobEvent, ApiError>> {
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_parses_frames_split_across_chunks() {
        let mut stream = NdjsonStream::new(chunks(vec![
            b"{\"type\": \"status\", \"phase\": \"sandbox_created\"}\n{\"type\": \"agent\", \"di",
            b"splay\": \"hello\"}\n",
            b"{\"type\": \"result\", \"success\": true}\n",
        ]));

        let events = drain(&mut stream).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().unwrap().event_type(), "status");
        assert_eq!(events[1].as_ref().unwrap().event_type(), "agent");
        assert!(events[2].as_ref().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_skips_heartbeat_and_blank_lines() {
        let mut stream = NdjsonStream::new(chunks(vec![
            b"heartbeat\n\nheartbeat\n{\"type\": \"result\", \"success\": true}\n",
        ]));

        let events = drain(&mut stream).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_swallows_malformed_frames() {
        let mut stream = NdjsonStream::new(chunks(vec![
            b"{not json at all\n{\"type\": \"mystery\"}\n{\"type\": \"result\", \"success\": false}\n",
        ]));

        let events = drain(&mut stream).await;
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            JobEvent::Result { success, .. } => assert!(!success),
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_without_terminal_is_connection_lost() {
        let mut stream = NdjsonStream::new(chunks(vec![
            b"{\"type\": \"status\", \"phase\": \"agent_started\"}\n",
        ]));

        assert!(stream.next_event().await.unwrap().is_ok());
        match stream.next_event().await.unwrap() {
            Err(ApiError::ConnectionLost(_)) => {}
            other => panic!("expected connection lost, got {:?}", other),
        }
        // And then the stream stays finished
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_after_terminal_is_clean() {
        let mut stream = NdjsonStream::new(chunks(vec![b"{\"type\": \"result\", \"success\": true}\n"]));

        assert!(stream.next_event().await.unwrap().is_ok());
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_is_connection_lost() {
        let items: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"{\"type\": \"status\", \"phase\": \"repo_cloned\"}\n".to_vec()),
            Err("connection reset by peer".into()),
        ];
        let mut stream = NdjsonStream::new(futures::stream::iter(items).boxed());

        assert!(stream.next_event().await.unwrap().is_ok());
        match stream.next_event().await.unwrap() {
            Err(ApiError::ConnectionLost(message)) => {
                assert!(message.contains("reset by peer"));
            }
            other => panic!("expected connection lost, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let mut stream = NdjsonStream::new(chunks(vec![b"{\"type\": \"result\", \"success\": true}"]));

        match stream.next_event().await.unwrap() {
            Ok(JobEvent::Result { success, .. }) => assert!(success),
            other => panic!("expected result, got {:?}", other),
        }
        assert!(stream.next_event().await.is_none());
    }
}
