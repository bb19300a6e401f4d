//! Flows
//!
//! A flow is a reusable, named step list plus a state value whose
//! [`FlowHooks`] run around every invocation. Each call to [`Flow::run`]
//! snapshots the steps into a fresh controller, so runs of the same flow
//! never share a cursor.
//!
//! # Example
//!
//! ```rust,no_run
//! use stepflow::context::Context;
//! use stepflow::workflow::{Flow, Next, Step};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut flow = Flow::new("onboarding");
//!     flow.add_step(Step::sync("create_account", |_call| Ok(Next::Continue)))?
//!         .add_step(Step::sync("send_welcome", |_call| Ok(Next::Continue)))?;
//!
//!     let outcome = flow.run(Context::new())?.wait().await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::context::{Context, SharedContext};
use crate::error::{BoxError, FlowError, Result};
use crate::execution::handle::RunLink;
use crate::execution::scheduler::DEFAULT_TICK;
use crate::execution::{Controller, Outcome, RunHandle};

use super::step::{Step, StepEntry};

/// Abstract name given to flows that don't set one.
pub const DEFAULT_ABSTRACT_NAME: &str = "baseFlow";

/// Lifecycle hooks of a flow, implemented by the flow's state type.
///
/// Every method has a default: the first two do nothing, `on_error`
/// returns the error unchanged so the run fails with it.
#[async_trait]
pub trait FlowHooks: Send + Sync + 'static {
    /// Runs before the controller is built. Failing here skips the run.
    async fn on_create(&self, _context: &SharedContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Runs once the controller succeeded or was stopped.
    async fn on_before_finish(&self, _outcome: &Outcome) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Receives every failure of the run or of the hooks above.
    ///
    /// Return `Ok(())` to swallow it, or an error (possibly a different
    /// one) to fail the run.
    async fn on_error(&self, error: FlowError) -> Result<()> {
        Err(error)
    }
}

impl FlowHooks for () {}

/// A named, reusable step list.
pub struct Flow<S = ()> {
    name: String,
    abstract_name: String,
    steps: Vec<Step<S>>,
    state: Arc<S>,
    tick: Duration,
}

impl Flow<()> {
    /// Creates a flow without state.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_state(name, ())
    }
}

impl<S: FlowHooks> Flow<S> {
    /// Creates a flow whose handlers and hooks share `state`.
    pub fn with_state(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            abstract_name: DEFAULT_ABSTRACT_NAME.to_string(),
            steps: Vec::new(),
            state: Arc::new(state),
            tick: DEFAULT_TICK,
        }
    }

    /// Sets the abstract name. A flow named like its abstract name is a
    /// template and refuses to run.
    pub fn with_abstract_name(mut self, abstract_name: impl Into<String>) -> Self {
        self.abstract_name = abstract_name.into();
        self
    }

    /// Sets the tick period of runs of this flow.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Renames the flow.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder form of [`Flow::set_steps`].
    pub fn with_steps<I>(mut self, entries: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<StepEntry<S>>,
    {
        self.set_steps(entries)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abstract_name(&self) -> &str {
        &self.abstract_name
    }

    pub fn is_abstract(&self) -> bool {
        self.name == self.abstract_name
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn steps(&self) -> &[Step<S>] {
        &self.steps
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// Appends a step, normalizing option entries.
    pub fn add_step(&mut self, entry: impl Into<StepEntry<S>>) -> Result<&mut Self> {
        let step = entry.into().into_step()?;
        self.warn_if_duplicate(&step);
        self.steps.push(step);
        Ok(self)
    }

    /// Inserts a step at the front of the list.
    pub fn add_default_step(&mut self, entry: impl Into<StepEntry<S>>) -> Result<&mut Self> {
        let step = entry.into().into_step()?;
        self.warn_if_duplicate(&step);
        self.steps.insert(0, step);
        Ok(self)
    }

    /// Replaces the step list.
    ///
    /// All entries are normalized first; on error the current list is kept.
    pub fn set_steps<I>(&mut self, entries: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<StepEntry<S>>,
    {
        let steps = entries
            .into_iter()
            .map(|entry| entry.into().into_step())
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name()) {
                warn!(
                    "Flow '{}' has more than one step named '{}'; jumps resolve to the first",
                    self.name,
                    step.name()
                );
            }
        }

        self.steps = steps;
        Ok(self)
    }

    fn warn_if_duplicate(&self, step: &Step<S>) {
        if self.steps.iter().any(|s| s.name() == step.name()) {
            warn!(
                "Flow '{}' has more than one step named '{}'; jumps resolve to the first",
                self.name,
                step.name()
            );
        }
    }

    /// Starts a run and returns its handle immediately.
    ///
    /// The abstract and tick checks happen before anything is scheduled.
    /// Hooks and steps then run on a spawned task; their result arrives
    /// through [`RunHandle::wait`], and the handle's status turns terminal
    /// only once every hook has run.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn run(&self, context: Context) -> Result<RunHandle> {
        if self.is_abstract() {
            return Err(FlowError::AbstractFlow {
                flow: self.name.clone(),
            });
        }
        if self.tick.is_zero() {
            return Err(FlowError::InvalidTick {
                flow: self.name.clone(),
            });
        }

        info!("Starting flow '{}' ({} steps)", self.name, self.steps.len());

        let (handle, link) = RunHandle::pair();
        let run = FlowRun {
            flow: self.name.clone(),
            steps: self.steps.clone(),
            state: Arc::clone(&self.state),
            tick: self.tick,
            context: SharedContext::new(context),
        };

        tokio::spawn(async move {
            let result = run.execute(&link).await;
            link.settle(result);
        });

        Ok(handle)
    }
}

/// Everything one run of a flow needs, detached from the flow itself.
struct FlowRun<S> {
    flow: String,
    steps: Vec<Step<S>>,
    state: Arc<S>,
    tick: Duration,
    context: SharedContext,
}

impl<S: FlowHooks> FlowRun<S> {
    async fn execute(self, link: &RunLink) -> Result<Outcome> {
        if let Err(source) = self.state.on_create(&self.context).await {
            let error = FlowError::Hook {
                flow: self.flow.clone(),
                hook: "on_create",
                source,
            };
            return self.recover(error).await;
        }

        let result = Controller::with_state(self.steps.clone(), Arc::clone(&self.state))
            .with_context(self.context.clone())
            .with_tick(self.tick)
            .drive(link)
            .await;

        match result {
            Ok(outcome) => match self.state.on_before_finish(&outcome).await {
                Ok(()) => {
                    debug!("Flow '{}' finished: {:?}", self.flow, outcome);
                    Ok(outcome)
                }
                Err(source) => {
                    let error = FlowError::Hook {
                        flow: self.flow.clone(),
                        hook: "on_before_finish",
                        source,
                    };
                    // A swallowed hook error keeps the run's own outcome
                    self.state.on_error(error).await.map(|()| outcome)
                }
            },
            Err(error) => self.recover(error).await,
        }
    }

    /// Hands a failure to `on_error`.
    async fn recover(&self, error: FlowError) -> Result<Outcome> {
        let message = error.to_string();
        self.state.on_error(error).await?;

        warn!("Flow '{}' recovered from: {}", self.flow, message);
        Ok(Outcome::Recovered { error: message })
    }
}
