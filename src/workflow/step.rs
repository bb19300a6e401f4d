//! Steps
//!
//! A step is a name plus a handler. Handlers receive a [`StepCall`] that
//! carries everything they may look at (neighbouring steps, the owning
//! flow's state, the run context and a resolver for name lookups) and answer
//! with a [`Next`] directive telling the controller where to go.
//!
//! # Example
//!
//! ```
//! use stepflow::workflow::{Next, Step, StepResult};
//!
//! let greet: Step = Step::new("greet", |call| async move {
//!     call.context.insert("greeted", true);
//!     StepResult::Ok(Next::Continue)
//! });
//!
//! let retry: Step = Step::sync("retry", |_call| Ok(Next::name("greet")));
//! assert_eq!(greet.name(), "greet");
//! assert_eq!(retry.name(), "retry");
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::context::SharedContext;
use crate::error::{BoxError, FlowError, Result};

/// What a handler answers with.
pub type StepResult<S = ()> = std::result::Result<Next<S>, BoxError>;

/// Something a step can run.
///
/// Implemented for every `Fn(StepCall<S>) -> impl Future<Output = Result<Next<S>, BoxError>>`
/// closure, so most steps never name this trait.
pub trait StepHandler<S = ()>: Send + Sync {
    fn call(&self, call: StepCall<S>) -> BoxFuture<'static, StepResult<S>>;
}

impl<S, F, Fut> StepHandler<S> for F
where
    F: Fn(StepCall<S>) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult<S>> + Send + 'static,
{
    fn call(&self, call: StepCall<S>) -> BoxFuture<'static, StepResult<S>> {
        Box::pin(self(call))
    }
}

/// Handler used by steps registered without one.
struct NoopHandler;

impl<S: 'static> StepHandler<S> for NoopHandler {
    fn call(&self, _call: StepCall<S>) -> BoxFuture<'static, StepResult<S>> {
        Box::pin(future::ready(Ok(Next::Continue)))
    }
}

/// A named unit of work.
///
/// Steps know nothing about their position; the controller owns the cursor.
pub struct Step<S = ()> {
    name: String,
    handler: Arc<dyn StepHandler<S>>,
}

impl<S> Clone for Step<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<S> fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

impl<S: Send + Sync + 'static> Step<S> {
    /// Creates a step from an async handler.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepCall<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<S>> + Send + 'static,
    {
        Self::from_handler(name, Arc::new(handler))
    }

    /// Creates a step from a synchronous handler.
    ///
    /// The result is wrapped in a ready future so the controller awaits
    /// every step the same way.
    pub fn sync<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepCall<S>) -> StepResult<S> + Send + Sync + 'static,
    {
        Self::new(name, move |call| future::ready(handler(call)))
    }

    /// Creates a step whose handler does nothing and falls through.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::from_handler(name, Arc::new(NoopHandler))
    }

    /// Creates a step from an already shared handler.
    pub fn from_handler(name: impl Into<String>, handler: Arc<dyn StepHandler<S>>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            handler,
        }
    }

    /// Runs the handler.
    ///
    /// Handler errors come back as [`FlowError::Handler`] with the original
    /// error as its source. A `Next::Name` answer without a resolver in
    /// `call` is an [`FlowError::InternalWiring`] failure.
    pub async fn handle(&self, mut call: StepCall<S>) -> Result<Next<S>> {
        call.step = self.name.clone();
        let has_resolver = call.resolver.is_some();

        let next = self.handler.call(call).await.map_err(|source| {
            // Errors the handler got from the engine itself pass through as-is
            match source.downcast::<FlowError>() {
                Ok(err) => *err,
                Err(source) => FlowError::Handler {
                    step: self.name.clone(),
                    source,
                },
            }
        })?;

        if matches!(next, Next::Name(_)) && !has_resolver {
            return Err(FlowError::InternalWiring {
                step: self.name.clone(),
            });
        }

        Ok(next)
    }
}

impl<S> Step<S> {
    /// Returns the step name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Where the controller should go after a step.
pub enum Next<S = ()> {
    /// Fall through to the next step in the list.
    Continue,
    /// Jump to this step (matched by name in the running list).
    Step(Step<S>),
    /// Jump to the step with this name.
    Name(String),
}

impl<S> Next<S> {
    /// Shorthand for `Next::Name`.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Name of the requested target, if any.
    pub fn target_name(&self) -> Option<&str> {
        match self {
            Self::Continue => None,
            Self::Step(step) => Some(step.name()),
            Self::Name(name) => Some(name),
        }
    }
}

impl<S> fmt::Debug for Next<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "Continue"),
            Self::Step(step) => f.debug_tuple("Step").field(&step.name).finish(),
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
        }
    }
}

impl<S> From<()> for Next<S> {
    fn from(_: ()) -> Self {
        Self::Continue
    }
}

impl<S> From<Step<S>> for Next<S> {
    fn from(step: Step<S>) -> Self {
        Self::Step(step)
    }
}

impl<S> From<&str> for Next<S> {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl<S> From<String> for Next<S> {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Looks steps up by name in one run's step list.
///
/// Duplicate names resolve to the first match.
pub struct Resolver<S = ()> {
    steps: Arc<[Step<S>]>,
}

impl<S> Clone for Resolver<S> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
        }
    }
}

impl<S> Resolver<S> {
    pub fn new(steps: Arc<[Step<S>]>) -> Self {
        Self { steps }
    }

    /// Index of the first step called `name`.
    ///
    /// Surrounding whitespace is ignored, the same way it is stripped from
    /// step names at construction.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.steps.iter().position(|s| s.name == name)
    }

    /// Index a directive points at; `None` for `Continue` or unknown names.
    pub fn index_of_target(&self, next: &Next<S>) -> Option<usize> {
        next.target_name().and_then(|name| self.index_of(name))
    }

    /// The first step called `name`.
    pub fn get(&self, name: &str) -> Option<Step<S>> {
        self.index_of(name).map(|i| self.steps[i].clone())
    }

    pub fn steps(&self) -> &[Step<S>] {
        &self.steps
    }
}

/// Everything a handler receives for one invocation.
pub struct StepCall<S = ()> {
    /// Step before the current one, if any.
    pub previous: Option<Step<S>>,
    /// Step after the current one, if any.
    pub next: Option<Step<S>>,
    /// State of the flow that owns the step.
    pub state: Arc<S>,
    /// Context of the run.
    pub context: SharedContext,
    step: String,
    resolver: Option<Resolver<S>>,
}

impl<S> StepCall<S> {
    /// Creates a call with no neighbours and no resolver.
    pub fn new(state: Arc<S>, context: SharedContext) -> Self {
        Self {
            previous: None,
            next: None,
            state,
            context,
            step: String::new(),
            resolver: None,
        }
    }

    /// Sets the neighbouring steps.
    pub fn between(mut self, previous: Option<Step<S>>, next: Option<Step<S>>) -> Self {
        self.previous = previous;
        self.next = next;
        self
    }

    /// Injects the name resolver.
    pub fn with_resolver(mut self, resolver: Resolver<S>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Name of the step being executed.
    pub fn step_name(&self) -> &str {
        &self.step
    }

    /// Looks up a step of the running list by name.
    pub fn resolve(&self, name: &str) -> Result<Option<Step<S>>> {
        let resolver = self.resolver.as_ref().ok_or_else(|| FlowError::InternalWiring {
            step: self.step.clone(),
        })?;
        Ok(resolver.get(name))
    }
}

/// Raw step description, normalized into a [`Step`] on registration.
pub struct StepOptions<S = ()> {
    pub name: Option<String>,
    pub handler: Option<Arc<dyn StepHandler<S>>>,
}

impl<S> Default for StepOptions<S> {
    fn default() -> Self {
        Self {
            name: None,
            handler: None,
        }
    }
}

impl<S> fmt::Debug for StepOptions<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepOptions")
            .field("name", &self.name)
            .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl<S: Send + Sync + 'static> StepOptions<S> {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            handler: None,
        }
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(StepCall<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<S>> + Send + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl<S: Send + Sync + 'static> TryFrom<StepOptions<S>> for Step<S> {
    type Error = FlowError;

    fn try_from(options: StepOptions<S>) -> Result<Self> {
        let name = match options.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(FlowError::MissingStepName {
                    entry: format!("{:?}", options),
                })
            }
        };

        Ok(match options.handler {
            Some(handler) => Step::from_handler(name, handler),
            None => Step::noop(name),
        })
    }
}

/// Either a ready step or options still to be normalized.
pub enum StepEntry<S = ()> {
    Step(Step<S>),
    Options(StepOptions<S>),
}

impl<S: Send + Sync + 'static> StepEntry<S> {
    /// Normalizes the entry, failing on a missing name.
    pub fn into_step(self) -> Result<Step<S>> {
        match self {
            Self::Step(step) => Ok(step),
            Self::Options(options) => Step::try_from(options),
        }
    }
}

impl<S> From<Step<S>> for StepEntry<S> {
    fn from(step: Step<S>) -> Self {
        Self::Step(step)
    }
}

impl<S> From<StepOptions<S>> for StepEntry<S> {
    fn from(options: StepOptions<S>) -> Self {
        Self::Options(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn call() -> StepCall {
        StepCall::new(Arc::new(()), SharedContext::default())
    }

    fn resolver(names: &[&str]) -> Resolver {
        let steps: Vec<Step> = names.iter().map(|n| Step::noop(*n)).collect();
        Resolver::new(steps.into())
    }

    #[tokio::test]
    async fn test_async_handler_result() {
        let step: Step = Step::new("jump", |_call| async { StepResult::Ok(Next::name("other")) });

        let next = step.handle(call().with_resolver(resolver(&["other"]))).await.unwrap();
        assert_eq!(next.target_name(), Some("other"));
    }

    #[tokio::test]
    async fn test_sync_handler_is_awaitable() {
        let step: Step = Step::sync("plain", |call| {
            call.context.insert("ran", true);
            Ok(Next::Continue)
        });

        let context = SharedContext::default();
        let next = step.handle(StepCall::new(Arc::new(()), context.clone())).await.unwrap();

        assert!(matches!(next, Next::Continue));
        assert_eq!(context.get("ran"), Some(serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_handler_sees_neighbours() {
        let step: Step = Step::sync("middle", |call| {
            assert_eq!(call.step_name(), "middle");
            assert_eq!(call.previous.as_ref().map(|s| s.name().to_string()), Some("first".into()));
            assert!(call.next.is_none());
            Ok(Next::Continue)
        });

        let call = call().between(Some(Step::noop("first")), None);
        step.handle(call).await.unwrap();
    }

    #[tokio::test]
    async fn test_name_without_resolver_is_wiring_error() {
        let step: Step = Step::sync("lost", |_call| Ok("somewhere".into()));

        let err = step.handle(call()).await.unwrap_err();
        assert!(matches!(err, FlowError::InternalWiring { ref step } if step == "lost"));
    }

    #[tokio::test]
    async fn test_resolve_inside_handler_without_resolver() {
        let step: Step = Step::sync("peek", |call| {
            call.resolve("anything")?;
            Ok(Next::Continue)
        });

        let err = step.handle(call()).await.unwrap_err();
        assert!(matches!(err, FlowError::InternalWiring { .. }));
    }

    #[tokio::test]
    async fn test_resolve_inside_handler() {
        let step: Step = Step::sync("peek", |call| {
            let found = call.resolve("b")?.expect("b exists");
            Ok(Next::Step(found))
        });

        let resolver = resolver(&["a", "b"]);
        let next = step.handle(call().with_resolver(resolver.clone())).await.unwrap();
        assert_eq!(resolver.index_of_target(&next), Some(1));
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let step: Step = Step::sync("boom", |_call| Err("exploded".into()));

        let err = step.handle(call()).await.unwrap_err();
        match &err {
            FlowError::Handler { step, .. } => assert_eq!(step, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.source().unwrap().to_string(), "exploded");
    }

    #[test]
    fn test_resolver_first_match_wins() {
        let resolver = resolver(&["a", "dup", "dup", "b"]);

        assert_eq!(resolver.index_of("dup"), Some(1));
        assert_eq!(resolver.index_of("missing"), None);
        assert_eq!(resolver.index_of_target(&Next::Continue), None);
    }

    #[test]
    fn test_options_without_name_fail() {
        let options: StepOptions = StepOptions::default();
        let err = StepEntry::from(options).into_step().unwrap_err();
        assert!(matches!(err, FlowError::MissingStepName { .. }));

        let blank: StepOptions = StepOptions::named("   ");
        assert!(Step::try_from(blank).is_err());
    }

    #[tokio::test]
    async fn test_options_without_handler_fall_through() {
        let step = Step::try_from(StepOptions::<()>::named("idle")).unwrap();
        assert_eq!(step.name(), "idle");

        let next = step.handle(call()).await.unwrap();
        assert!(matches!(next, Next::Continue));
    }

    #[test]
    fn test_step_name_is_trimmed() {
        let step: Step = Step::noop("  spaced  ");
        assert_eq!(step.name(), "spaced");
    }

    #[test]
    fn test_padded_target_resolves() {
        let resolver = resolver(&[" a", " b "]);

        assert_eq!(resolver.index_of(" b"), Some(1));
        assert_eq!(resolver.index_of_target(&Next::name("b ")), Some(1));
        assert!(resolver.get("\ta\n").is_some());
    }

    struct Counter;

    #[tokio::test]
    async fn test_noop_with_custom_state() {
        let step: Step<Counter> = Step::noop("idle");
        let state = Arc::new(Counter);

        let next = step
            .handle(StepCall::new(state, SharedContext::default()))
            .await
            .unwrap();
        assert!(matches!(next, Next::Continue));
    }
}
