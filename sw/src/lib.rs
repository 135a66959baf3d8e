//! Shipwright - rate-limited ship orchestrator
//!
//! Hands an imported task plan to a remote execution agent and shepherds the
//! result: admission control through a keyed token bucket, bounded retry with
//! exponential backoff, an NDJSON event stream reader, and a ship loop that
//! tracks task completion either per task or across one whole-plan session.
//!
//! # Architecture
//!
//! ```text
//! sw plan tasks.json          sw ship                    sw attach
//!        │                       │                           │
//!        ▼                       ▼                           ▼
//!   session.json ◄──────── ShipEngine ──────────► remote execute API
//!   plan.json               │  │  │                   (NDJSON stream)
//!                           │  │  └─ RetryingExecutor ─ RateLimiter
//!                           │  └─ completion heuristics
//!                           └─ JobRegistry (jobs.json)
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod limiter;
pub mod retry;
pub mod ship;

pub use api::{AgentClient, ApiError, HttpAgentClient, JobEvent};
pub use limiter::{Admission, RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryingExecutor};
pub use ship::{ShipEngine, ShipMode, ShipOptions, ShipOutcome};
