//! Run Controller
//!
//! Drives a single run over an ordered step list: one step per tick,
//! following the directive each step returns, until the cursor runs off the
//! end, a stop is requested, or something fails.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, warn};

use crate::context::{Context, SharedContext};
use crate::error::{FlowError, Result};
use crate::monitoring::EventType;
use crate::workflow::{Next, Resolver, Step, StepCall};

use super::handle::{Outcome, RunHandle, RunLink, RunStatus};
use super::scheduler::{IntervalTicker, Ticker, DEFAULT_TICK};

/// Owns one execution run.
///
/// A controller is consumed by [`Controller::spawn`], so it can run only
/// once. Stop it through the returned [`RunHandle`].
///
/// # Example
///
/// ```rust,no_run
/// use stepflow::execution::Controller;
/// use stepflow::workflow::{Next, Step};
///
/// #[tokio::main]
/// async fn main() {
///     let steps = vec![
///         Step::sync("first", |_call| Ok(Next::Continue)),
///         Step::sync("second", |_call| Ok(Next::Continue)),
///     ];
///
///     let handle = Controller::new(steps).spawn();
///     let outcome = handle.wait().await.unwrap();
///     println!("{:?}", outcome);
/// }
/// ```
pub struct Controller<S = ()> {
    steps: Arc<[Step<S>]>,
    state: Arc<S>,
    context: SharedContext,
    tick: Duration,
    ticker: Option<Box<dyn Ticker>>,
    cursor: usize,
}

impl Controller<()> {
    /// Creates a controller for steps that need no flow state.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self::with_state(steps, Arc::new(()))
    }
}

impl<S: Send + Sync + 'static> Controller<S> {
    /// Creates a controller whose handlers receive `state`.
    pub fn with_state(steps: impl IntoIterator<Item = Step<S>>, state: Arc<S>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            state,
            context: SharedContext::default(),
            tick: DEFAULT_TICK,
            ticker: None,
            cursor: 0,
        }
    }

    /// Sets the context handed to every handler.
    pub fn with_context(mut self, context: impl Into<SharedContext>) -> Self {
        self.context = context.into();
        self
    }

    /// Sets the tick period used when no ticker is supplied.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Replaces the interval with a custom tick source.
    pub fn with_ticker(mut self, ticker: impl Ticker + 'static) -> Self {
        self.ticker = Some(Box::new(ticker));
        self
    }

    /// Number of steps in this run.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Context shared with the handlers.
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Starts the run on the Tokio runtime and returns its handle at once.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn(self) -> RunHandle {
        let (handle, link) = RunHandle::pair();
        tokio::spawn(async move {
            let result = self.drive(&link).await;
            link.settle(result);
        });
        handle
    }

    /// Runs the tick loop to a terminal state.
    pub(crate) async fn drive(mut self, link: &RunLink) -> Result<Outcome> {
        let mut ticker = match self.ticker.take() {
            Some(ticker) => ticker,
            None => Box::new(IntervalTicker::new(self.tick)) as Box<dyn Ticker>,
        };
        let resolver = Resolver::new(Arc::clone(&self.steps));

        link.set_status(RunStatus::Running);
        info!("Starting run: {} steps, tick {:?}", self.steps.len(), self.tick);

        let result = loop {
            if !ticker.tick().await {
                break Err(FlowError::SchedulerClosed);
            }

            match self.advance(&resolver, link).await {
                Ok(Some(outcome)) => break Ok(outcome),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };

        // Terminal from here on; no further ticks
        drop(ticker);

        // The terminal status is published when the run settles, after any
        // hooks of the owning flow had their say
        match &result {
            Ok(Outcome::Stopped(value)) => {
                warn!("Run stopped at step {} with value {}", self.cursor, value);
            }
            Ok(_) => info!("Run completed successfully"),
            Err(e) => error!("Run failed at step {}: {}", self.cursor, e),
        }

        result
    }

    /// Executes one tick. Returns the outcome once the run is over.
    async fn advance(&mut self, resolver: &Resolver<S>, link: &RunLink) -> Result<Option<Outcome>> {
        // A pending stop wins over any further progress
        if let Some(value) = link.stop_requested() {
            return Ok(Some(Outcome::Stopped(value)));
        }

        let Some(current) = self.steps.get(self.cursor).cloned() else {
            return Ok(Some(Outcome::Succeeded));
        };

        let previous = self
            .cursor
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .cloned();
        let next = self.steps.get(self.cursor + 1).cloned();

        debug!("Step '{}' (cursor {})", current.name(), self.cursor);
        link.timeline.add_event(current.name(), EventType::Started);

        let call = StepCall::new(Arc::clone(&self.state), self.context.clone())
            .between(previous, next)
            .with_resolver(resolver.clone());

        let directive = match AssertUnwindSafe(current.handle(call)).catch_unwind().await {
            Ok(Ok(directive)) => directive,
            Ok(Err(e)) => {
                link.timeline.add_event(current.name(), EventType::Failed);
                return Err(e);
            }
            Err(panic) => {
                link.timeline.add_event(current.name(), EventType::Failed);
                return Err(FlowError::Panicked {
                    step: current.name().to_string(),
                    message: panic_message(panic.as_ref()),
                });
            }
        };

        match directive {
            Next::Continue => self.cursor += 1,
            target => match resolver.index_of_target(&target) {
                Some(index) => {
                    debug!(
                        "Step '{}' jumps to '{}'",
                        current.name(),
                        target.target_name().unwrap_or_default()
                    );
                    self.cursor = index;
                }
                None => {
                    link.timeline.add_event(current.name(), EventType::Failed);
                    return Err(FlowError::Navigation {
                        step: current.name().to_string(),
                        target: target.target_name().unwrap_or_default().to_string(),
                    });
                }
            },
        }

        link.timeline.add_event(current.name(), EventType::Completed);
        Ok(None)
    }
}

/// Text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<S> From<&Controller<S>> for Context {
    fn from(controller: &Controller<S>) -> Self {
        controller.context.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scheduler::ManualTicker;
    use crate::workflow::StepResult;
    use serde_json::json;
    use std::error::Error as _;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    /// Step that appends its name to the context "log" array.
    fn logging_step(name: &'static str) -> Step {
        Step::sync(name, |call| {
            call.context.update(|map| {
                let log = map.entry("log").or_insert_with(|| json!([]));
                if let Some(entries) = log.as_array_mut() {
                    entries.push(json!(call.step_name()));
                }
            });
            Ok(Next::Continue)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order_once_each() {
        let start = Instant::now();
        let handle = Controller::new(vec![logging_step("a"), logging_step("b"), logging_step("c")]).spawn();
        let timeline = handle.timeline();

        let outcome = handle.wait().await.unwrap();

        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(timeline.visits(), vec!["a", "b", "c"]);
        // Three step ticks plus the one that finds the end of the list
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_list_succeeds_on_first_tick() {
        let start = Instant::now();
        let outcome = Controller::new(Vec::new()).spawn().wait().await.unwrap();

        assert_eq!(outcome.into_value(), json!("success"));
        assert_eq!(start.elapsed(), DEFAULT_TICK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_tick() {
        let start = Instant::now();
        Controller::new(vec![logging_step("only")])
            .with_tick(Duration::from_millis(10))
            .spawn()
            .wait()
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_context_is_shared_with_handlers() {
        let (ticker, ticks) = ManualTicker::new();
        let controller = Controller::new(vec![logging_step("a"), logging_step("b")]).with_ticker(ticker);
        let context = controller.context().clone();

        ticks.advance(3);
        controller.spawn().wait().await.unwrap();

        assert_eq!(context.get("log"), Some(json!(["a", "b"])));
    }

    #[tokio::test]
    async fn test_self_redirect_reruns_on_next_tick() {
        let poll: Step = Step::sync("poll", |call| {
            let attempts = call.context.get("attempts").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
            call.context.insert("attempts", attempts);
            if attempts < 3 {
                Ok(Next::name("poll"))
            } else {
                Ok(Next::Continue)
            }
        });

        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![poll]).with_ticker(ticker).spawn();
        let timeline = handle.timeline();

        ticks.advance(4);
        assert_eq!(handle.wait().await.unwrap(), Outcome::Succeeded);
        assert_eq!(timeline.visits(), vec!["poll", "poll", "poll"]);
    }

    #[tokio::test]
    async fn test_jump_back_once() {
        let a = logging_step("A");
        let b: Step = Step::sync("B", |call| {
            if call.context.insert("jumped", true).is_none() {
                Ok(Next::name("A"))
            } else {
                Ok(Next::Continue)
            }
        });
        let c = logging_step("C");

        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![a, b, c]).with_ticker(ticker).spawn();
        let timeline = handle.timeline();

        ticks.advance(6);
        assert_eq!(handle.wait().await.unwrap(), Outcome::Succeeded);
        assert_eq!(timeline.visits(), vec!["A", "B", "A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_jump_to_step_value() {
        let skip: Step = Step::sync("skip", |_call| Ok(Next::Step(Step::noop("c"))));

        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![skip, logging_step("b"), logging_step("c")])
            .with_ticker(ticker)
            .spawn();
        let timeline = handle.timeline();

        ticks.advance(3);
        handle.wait().await.unwrap();
        assert_eq!(timeline.visits(), vec!["skip", "c"]);
    }

    #[tokio::test]
    async fn test_unknown_target_fails_navigation() {
        let a: Step = Step::sync("A", |_call| Ok("Z".into()));

        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![a, logging_step("B")]).with_ticker(ticker).spawn();
        let timeline = handle.timeline();

        ticks.advance(3);
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(
            err,
            FlowError::Navigation { ref step, ref target } if step == "A" && target == "Z"
        ));
        assert_eq!(timeline.visits(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_handler_error_fails_run_without_more_ticks() {
        let a: Step = Step::new("A", |_call| async { StepResult::Err("boom".into()) });

        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![a, logging_step("B")]).with_ticker(ticker).spawn();
        let timeline = handle.timeline();

        ticks.tick();
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err.source().unwrap().to_string(), "boom");
        assert_eq!(timeline.visits(), vec!["A"]);
        // The ticker was released with the run
        assert!(!ticks.tick());
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_run() {
        let explode: Step = Step::sync("explode", |_call| panic!("handler blew up"));

        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![explode, logging_step("B")])
            .with_ticker(ticker)
            .spawn();
        let status = handle.subscribe();
        let timeline = handle.timeline();

        ticks.advance(2);
        let err = handle.wait().await.unwrap_err();

        match err {
            FlowError::Panicked { step, message } => {
                assert_eq!(step, "explode");
                assert_eq!(message, "handler blew up");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*status.borrow(), RunStatus::Failed);
        assert_eq!(timeline.visits(), vec!["explode"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tick_still_runs() {
        let handle = Controller::new(vec![logging_step("a")])
            .with_tick(Duration::ZERO)
            .spawn();
        let status = handle.subscribe();

        assert_eq!(handle.wait().await.unwrap(), Outcome::Succeeded);
        assert_eq!(*status.borrow(), RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_stop_before_first_tick() {
        let (ticker, ticks) = ManualTicker::new();
        let controller = Controller::new(vec![logging_step("a")]).with_ticker(ticker);
        let context = controller.context().clone();
        let handle = controller.spawn();
        let timeline = handle.timeline();

        handle.stop(json!({"reason": "shutdown"}));
        ticks.tick();

        let status = handle.stop_handle();
        assert!(status.is_requested());
        assert_eq!(
            handle.wait().await.unwrap(),
            Outcome::Stopped(json!({"reason": "shutdown"}))
        );
        assert!(timeline.visits().is_empty());
        assert!(context.get("log").is_none());
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_step() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let slow: Step = {
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            Step::new("slow", move |call| {
                let entered = Arc::clone(&entered);
                let release = Arc::clone(&release);
                async move {
                    entered.notify_one();
                    release.notified().await;
                    call.context.insert("finished", true);
                    StepResult::Ok(Next::Continue)
                }
            })
        };

        let (ticker, ticks) = ManualTicker::new();
        let controller = Controller::new(vec![slow, logging_step("after")]).with_ticker(ticker);
        let context = controller.context().clone();
        let handle = controller.spawn();

        ticks.tick();
        entered.notified().await;
        assert_eq!(handle.status(), RunStatus::Running);

        handle.stop("late");
        release.notify_one();
        ticks.advance(2);

        assert_eq!(handle.wait().await.unwrap(), Outcome::Stopped(json!("late")));
        assert_eq!(context.get("finished"), Some(json!(true)));
        assert!(context.get("log").is_none());
    }

    #[tokio::test]
    async fn test_closed_scheduler_fails_run() {
        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![logging_step("a")]).with_ticker(ticker).spawn();

        drop(ticks);
        assert!(matches!(handle.wait().await, Err(FlowError::SchedulerClosed)));
    }

    #[tokio::test]
    async fn test_neighbours_are_passed() {
        let first: Step = Step::sync("first", |call| {
            assert!(call.previous.is_none());
            assert_eq!(call.next.as_ref().map(|s| s.name()), Some("last"));
            Ok(Next::Continue)
        });
        let last: Step = Step::sync("last", |call| {
            assert_eq!(call.previous.as_ref().map(|s| s.name()), Some("first"));
            assert!(call.next.is_none());
            Ok(Next::Continue)
        });

        let (ticker, ticks) = ManualTicker::new();
        let handle = Controller::new(vec![first, last]).with_ticker(ticker).spawn();
        ticks.advance(3);

        assert_eq!(handle.wait().await.unwrap(), Outcome::Succeeded);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (ticker, ticks) = ManualTicker::new();
        let controller = Controller::new(vec![logging_step("a")]).with_ticker(ticker);
        assert_eq!(controller.len(), 1);
        assert!(!controller.is_empty());

        let handle = controller.spawn();
        assert!(!handle.status().is_terminal());

        ticks.advance(2);
        let stop = handle.stop_handle();
        let status = handle.subscribe();
        let timeline = handle.timeline();
        handle.wait().await.unwrap();

        assert!(!stop.is_requested());
        assert_eq!(*status.borrow(), RunStatus::Succeeded);
        assert_eq!(timeline.get_events().len(), 2);
    }

    #[test]
    fn test_context_snapshot_from_controller() {
        let mut context = Context::new();
        context.insert("seed".into(), json!(7));

        let controller = Controller::new(Vec::new()).with_context(context);
        let snapshot = Context::from(&controller);
        assert_eq!(snapshot["seed"], json!(7));
    }
}
