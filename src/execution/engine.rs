//! Flow Engine
//!
//! The engine is a registry of flows keyed by name. It keeps registration
//! order, so the first flow doubles as the default dispatch target, and it
//! merges its own default context into every run it starts.
//!
//! # Example
//!
//! ```rust,no_run
//! use stepflow::context::Context;
//! use stepflow::execution::{Engine, FlowRef};
//! use stepflow::workflow::{Flow, Next, Step};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let invoice = Flow::new("invoice")
//!         .with_steps(vec![Step::sync("issue", |_call| Ok(Next::Continue))])?;
//!
//!     let mut engine = Engine::new("billing");
//!     engine.add_flow(invoice)?;
//!
//!     let handle = engine.dispatch(FlowRef::named("invoice"), Context::new())?;
//!     println!("{:?}", handle.wait().await?);
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info};

use crate::config::EngineConfig;
use crate::context::{self, Context};
use crate::error::{FlowError, Result};
use crate::execution::scheduler::DEFAULT_TICK;
use crate::execution::RunHandle;
use crate::workflow::{Flow, FlowHooks};

/// Anything the engine can register and start.
pub trait Runnable: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// Whether the runnable is a template that refuses to run.
    fn is_abstract(&self) -> bool {
        false
    }

    /// Starts one run with an already merged context.
    fn run(&self, context: Context) -> Result<RunHandle>;
}

impl<S: FlowHooks> Runnable for Flow<S> {
    fn name(&self) -> &str {
        Flow::name(self)
    }

    fn is_abstract(&self) -> bool {
        Flow::is_abstract(self)
    }

    fn run(&self, context: Context) -> Result<RunHandle> {
        Flow::run(self, context)
    }
}

impl<R: Runnable + ?Sized> Runnable for Arc<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_abstract(&self) -> bool {
        (**self).is_abstract()
    }

    fn run(&self, context: Context) -> Result<RunHandle> {
        (**self).run(context)
    }
}

/// Which flow a dispatch targets.
#[derive(Clone, Default)]
pub enum FlowRef {
    /// The first registered flow.
    #[default]
    First,
    /// A registered flow, looked up by name.
    Named(String),
    /// A flow value, run without touching the registry.
    Flow(Arc<dyn Runnable>),
}

impl FlowRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn flow(flow: impl Runnable + 'static) -> Self {
        Self::Flow(Arc::new(flow))
    }
}

impl fmt::Debug for FlowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("First"),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Flow(flow) => f.debug_tuple("Flow").field(&flow.name()).finish(),
        }
    }
}

impl From<&str> for FlowRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for FlowRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Arc<dyn Runnable>> for FlowRef {
    fn from(flow: Arc<dyn Runnable>) -> Self {
        Self::Flow(flow)
    }
}

impl<S: FlowHooks> From<Flow<S>> for FlowRef {
    fn from(flow: Flow<S>) -> Self {
        Self::Flow(Arc::new(flow))
    }
}

/// Registry and dispatcher of flows.
pub struct Engine {
    name: String,
    context: Context,
    tick: Duration,
    flows: IndexMap<String, Arc<dyn Runnable>>,
}

impl Engine {
    /// Creates an empty engine.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: Context::new(),
            tick: DEFAULT_TICK,
            flows: IndexMap::new(),
        }
    }

    /// Builds an empty engine from loaded configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.name.clone())
            .with_context(config.context.clone())
            .with_tick(config.tick())
    }

    /// Sets the context merged under every dispatched run.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Sets the tick that flows built for this engine should use.
    ///
    /// Registered flows keep their own tick; this is read by code that
    /// builds flows from the engine's configuration.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Appends a flow to the registry.
    pub fn add_flow(&mut self, flow: impl Runnable + 'static) -> Result<&mut Self> {
        self.register(Arc::new(flow), false)?;
        Ok(self)
    }

    /// Registers a flow as the new default target.
    pub fn add_default_flow(&mut self, flow: impl Runnable + 'static) -> Result<&mut Self> {
        self.register(Arc::new(flow), true)?;
        Ok(self)
    }

    /// Builds a flow with `build` and appends it.
    pub fn add_flow_with<F, R>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce() -> R,
        R: Runnable + 'static,
    {
        self.add_flow(build())
    }

    /// Replaces the registry.
    ///
    /// On a duplicate name the current registry is kept.
    pub fn set_flows<I>(&mut self, flows: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Runnable + 'static,
    {
        let mut registry: IndexMap<String, Arc<dyn Runnable>> = IndexMap::new();
        for flow in flows {
            let name = flow.name().to_string();
            if registry.contains_key(&name) {
                return Err(FlowError::DuplicateFlow {
                    flow: name,
                    engine: self.name.clone(),
                });
            }
            registry.insert(name, Arc::new(flow));
        }

        self.flows = registry;
        Ok(self)
    }

    fn register(&mut self, flow: Arc<dyn Runnable>, front: bool) -> Result<()> {
        let name = flow.name().to_string();
        if self.flows.contains_key(&name) {
            return Err(FlowError::DuplicateFlow {
                flow: name,
                engine: self.name.clone(),
            });
        }

        debug!("Engine '{}' registered flow '{}'", self.name, name);
        if front {
            self.flows.shift_insert(0, name, flow);
        } else {
            self.flows.insert(name, flow);
        }
        Ok(())
    }

    /// Looks up a registered flow.
    pub fn flow(&self, name: &str) -> Option<Arc<dyn Runnable>> {
        self.flows.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Registered flow names, default target first.
    pub fn names(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }

    /// Starts a run of the targeted flow.
    ///
    /// The run sees the engine context overlaid with `context`. Lookup
    /// failures leave the registry as it was and start nothing.
    pub fn dispatch(&self, target: impl Into<FlowRef>, context: Context) -> Result<RunHandle> {
        let flow = match target.into() {
            FlowRef::Flow(flow) => flow,
            FlowRef::Named(name) => self.flow(&name).ok_or_else(|| FlowError::FlowNotFound {
                flow: name,
                engine: self.name.clone(),
            })?,
            FlowRef::First => self
                .flows
                .values()
                .next()
                .cloned()
                .ok_or_else(|| FlowError::NoFlows {
                    engine: self.name.clone(),
                })?,
        };

        info!("Engine '{}' dispatching flow '{}'", self.name, flow.name());
        flow.run(context::merge(&self.context, context))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("flows", &self.names())
            .field("tick", &self.tick)
            .finish()
    }
}
