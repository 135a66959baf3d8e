//! Remote execution API
//!
//! The client half of the execute service: request admission happens in the
//! caller (see `retry`), this module owns the wire types, the HTTP calls, and
//! the NDJSON event stream.

pub mod client;
pub mod error;
pub mod http;
pub mod stream;
pub mod types;

pub use client::{AgentClient, JobEventSource};
pub use error::ApiError;
pub use http::HttpAgentClient;
pub use stream::NdjsonStream;
pub use types::{AgentEventKind, ExecuteRequest, ExecuteResponse, JobEvent};
