//! Stepflow - Tick-driven Step Flow Engine
//!
//! Runs ordered lists of named steps one per tick. Each step returns a
//! directive: fall through to the next step, or jump to any step of the
//! list by name, backwards included. Runs can be stopped cooperatively and
//! always settle with exactly one outcome.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`workflow`]: Steps and flows (step lists plus lifecycle hooks)
//! - [`execution`]: Run controller, tick scheduling and the flow engine
//! - [`monitoring`]: Per-run execution timeline
//! - [`config`]: Engine configuration loading
//! - [`context`]: Shared key-value context handed to steps
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use stepflow::{Context, Engine, Flow, Next, Step};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut flow = Flow::new("retry");
//!     flow.add_step(Step::sync("attempt", |call| {
//!         let tries = call.context.get("tries").and_then(|v| v.as_u64()).unwrap_or(0);
//!         call.context.insert("tries", tries + 1);
//!         if tries < 2 {
//!             Ok(Next::name("attempt"))
//!         } else {
//!             Ok(Next::Continue)
//!         }
//!     }))?;
//!
//!     let mut engine = Engine::new("main");
//!     engine.add_flow(flow)?;
//!
//!     let outcome = engine.dispatch("retry", Context::new())?.wait().await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::{load_config, EngineConfig};
pub use context::{Context, SharedContext};
pub use error::{FlowError, Result};
pub use execution::{Controller, Engine, FlowRef, Outcome, RunHandle, RunStatus};
pub use workflow::{Flow, FlowHooks, Next, Step, StepCall};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Stepflow";
