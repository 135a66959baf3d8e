//! Execution orchestration
//!
//! `engine` owns the run loop, `observer` is how callers watch it, `prompt`
//! builds what the remote agent sees, and `heuristics` reads completion
//! signals back out of the event stream.

pub mod engine;
pub mod heuristics;
pub mod observer;
pub mod prompt;

pub use engine::{RATE_LIMIT_KEY, ShipEngine, ShipMode, ShipOptions, ShipOutcome};
pub use observer::{ConsoleObserver, NullObserver, ShipObserver, StepDecision};
