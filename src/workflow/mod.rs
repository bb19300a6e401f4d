//! Flow Definition Module
//!
//! Steps and the flows that group them.
//!
//! # Structure
//!
//! - [`step`]: Steps, handlers and navigation directives
//! - [`flow`]: Named step lists with lifecycle hooks

pub mod flow;
pub mod step;

pub use flow::{Flow, FlowHooks, DEFAULT_ABSTRACT_NAME};
pub use step::{
    Next, Resolver, Step, StepCall, StepEntry, StepHandler, StepOptions, StepResult,
};
