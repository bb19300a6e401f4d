//! Error Types
//!
//! Every failure a run can end in, plus the configuration errors raised
//! synchronously while flows and engines are being set up.

use thiserror::Error;

/// Boxed error returned by step handlers and lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while configuring or running flows.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow is a template (`name == abstract_name`) and cannot run.
    #[error("Unable to start '{flow}' flow: the flow is abstract. Give it a name different from its abstract name")]
    AbstractFlow { flow: String },

    /// A step options entry was registered without a name.
    #[error("Step entry has no name: {entry}")]
    MissingStepName { entry: String },

    /// Dispatch by name found nothing in the registry.
    #[error("Flow '{flow}' does not exist in engine '{engine}'")]
    FlowNotFound { flow: String, engine: String },

    /// Dispatch without a target on an empty registry.
    #[error("No flows in engine '{engine}'. Register a flow or pass one directly")]
    NoFlows { engine: String },

    /// A flow with the same name is already registered.
    #[error("Flow '{flow}' is already registered in engine '{engine}'")]
    DuplicateFlow { flow: String, engine: String },

    /// The flow's tick period is zero.
    #[error("Unable to start '{flow}' flow: tick period must be greater than zero")]
    InvalidTick { flow: String },

    /// A handler asked for a step that is not part of the running list.
    #[error("Unable to continue flow: step '{step}' requested unknown step '{target}'")]
    Navigation { step: String, target: String },

    /// A handler navigated by name but no resolver was injected.
    ///
    /// Unreachable through the public run API; seeing it means the
    /// controller wiring is broken.
    #[error("Step '{step}' navigated by name but no resolver was supplied (internal wiring defect)")]
    InternalWiring { step: String },

    /// A step handler returned an error.
    #[error("Step '{step}' failed: {source}")]
    Handler {
        step: String,
        #[source]
        source: BoxError,
    },

    /// A step handler panicked.
    #[error("Step '{step}' panicked: {message}")]
    Panicked { step: String, message: String },

    /// A lifecycle hook returned an error.
    #[error("Flow '{flow}' {hook} hook failed: {source}")]
    Hook {
        flow: String,
        hook: &'static str,
        #[source]
        source: BoxError,
    },

    /// The tick source shut down before the run reached a terminal state.
    #[error("Tick scheduler closed before the run finished")]
    SchedulerClosed,

    /// The run task went away without delivering a result.
    #[error("Run was abandoned before it settled")]
    Abandoned,
}

impl FlowError {
    /// Returns true for errors raised while setting things up, before any
    /// step could run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::AbstractFlow { .. }
                | Self::MissingStepName { .. }
                | Self::FlowNotFound { .. }
                | Self::NoFlows { .. }
                | Self::DuplicateFlow { .. }
                | Self::InvalidTick { .. }
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, FlowError>;
