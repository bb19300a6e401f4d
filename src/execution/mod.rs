//! Flow Execution Module
//!
//! Runs step lists and dispatches flows.
//!
//! # Architecture
//!
//! - [`controller`]: The tick loop driving one run
//! - [`engine`]: Flow registry and dispatch
//! - [`handle`]: Caller side of a run (stop, status, result)
//! - [`scheduler`]: Tick sources, real and manual

pub mod controller;
pub mod engine;
pub mod handle;
pub mod scheduler;

pub use controller::Controller;
pub use engine::{Engine, FlowRef, Runnable};
pub use handle::{Outcome, RunHandle, RunStatus, StopHandle, FLOW_SUCCESS};
pub use scheduler::{IntervalTicker, ManualTicker, TickHandle, Ticker, DEFAULT_TICK, MIN_TICK};
