//! Wire types for the remote execution service
//!
//! The service speaks camelCase JSON. Stream frames are a tagged union on
//! `type`; unknown extra fields are ignored so the service can grow its
//! payloads without breaking older clients.

use serde::{Deserialize, Serialize};

/// Literal keep-alive line on the event stream, never valid JSON
pub const HEARTBEAT: &str = "heartbeat";

/// Request body for starting a remote execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// Repository the agent works on (e.g., "acme/api")
    pub repo: String,

    /// Branch the work lands on
    pub branch: String,

    /// Full instruction prompt for the agent
    pub prompt: String,

    /// Session the job belongs to, echoed back in service logs
    pub session_id: String,
}

/// Response from a successful execute call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    /// Remote job identifier
    pub job_id: String,

    /// Where to consume the job's event stream
    pub stream_url: String,
}

/// Kind of agent activity inside an `agent` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    ToolCall,
    ToolResult,
    Thinking,
    #[default]
    Message,
}

impl std::fmt::Display for AgentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolCall => write!(f, "tool_call"),
            Self::ToolResult => write!(f, "tool_result"),
            Self::Thinking => write!(f, "thinking"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// One frame on a job's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Lifecycle progress (sandbox_created, repo_cloned, agent_started, ...)
    Status {
        phase: String,
        #[serde(default)]
        message: Option<String>,
    },

    /// Agent activity while working
    Agent {
        #[serde(default)]
        kind: AgentEventKind,
        /// Tool name for tool_call / tool_result frames
        #[serde(default)]
        tool: Option<String>,
        /// Human-readable rendering of the activity
        #[serde(default)]
        display: Option<String>,
    },

    /// Terminal: the job finished and reports its outcome
    #[serde(rename_all = "camelCase")]
    Result {
        success: bool,
        #[serde(default)]
        pr_url: Option<String>,
        #[serde(default)]
        commit_sha: Option<String>,
        #[serde(default)]
        files_changed: Option<u32>,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },

    /// Terminal: the job died
    Error { message: String },
}

impl JobEvent {
    /// Event type tag as it appears on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Agent { .. } => "agent",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
        }
    }

    /// Check if this frame ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}
