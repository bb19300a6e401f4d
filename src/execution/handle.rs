//! Run Handles
//!
//! The caller side of a run: stop it, watch its status and wait for the
//! single result it settles with.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, watch};

use crate::error::{FlowError, Result};
use crate::monitoring::ExecutionTimeline;

/// Value a successful run resolves with.
pub const FLOW_SUCCESS: &str = "success";

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }

    /// Terminal status matching a settled result.
    ///
    /// A recovered run counts as succeeded: its error hook accepted the
    /// failure and the caller gets `Ok`.
    pub fn settled(result: &Result<Outcome>) -> Self {
        match result {
            Ok(Outcome::Stopped(_)) => Self::Stopped,
            Ok(_) => Self::Succeeded,
            Err(_) => Self::Failed,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How a run ended when it did not end in an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Every step ran and the cursor moved past the end.
    Succeeded,
    /// The run was stopped with this value.
    Stopped(Value),
    /// The run failed and the flow's error hook swallowed the failure.
    Recovered { error: String },
}

impl Outcome {
    /// The value callers observe: the success sentinel, the stop value, or
    /// the swallowed error message.
    pub fn into_value(self) -> Value {
        match self {
            Self::Succeeded => Value::String(FLOW_SUCCESS.to_string()),
            Self::Stopped(value) => value,
            Self::Recovered { error } => Value::String(error),
        }
    }
}

/// Requests a run to stop at its next tick.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<Option<Value>>>,
}

impl StopHandle {
    /// Requests termination with `value`.
    ///
    /// Never interrupts a step already running. Calling it again before the
    /// next tick replaces the value.
    pub fn stop(&self, value: impl Into<Value>) {
        self.sender.send_replace(Some(value.into()));
    }

    /// Whether a stop was requested.
    pub fn is_requested(&self) -> bool {
        self.sender.borrow().is_some()
    }
}

/// Handle to one spawned run.
pub struct RunHandle {
    stop: StopHandle,
    status: watch::Receiver<RunStatus>,
    timeline: ExecutionTimeline,
    result: oneshot::Receiver<Result<Outcome>>,
}

impl RunHandle {
    /// Creates a handle together with the link the run writes through.
    pub(crate) fn pair() -> (Self, RunLink) {
        let (stop_tx, stop_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(RunStatus::Idle);
        let (result_tx, result_rx) = oneshot::channel();
        let timeline = ExecutionTimeline::new();

        let handle = Self {
            stop: StopHandle {
                sender: Arc::new(stop_tx),
            },
            status: status_rx,
            timeline: timeline.clone(),
            result: result_rx,
        };
        let link = RunLink {
            stop: stop_rx,
            status: status_tx,
            timeline,
            result: result_tx,
        };
        (handle, link)
    }

    /// Requests the run to stop at its next tick.
    pub fn stop(&self, value: impl Into<Value>) {
        self.stop.stop(value);
    }

    /// A stop handle that can outlive this handle.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current status of the run.
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Receiver of status changes, usable after [`RunHandle::wait`]
    /// consumed the handle.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// Step visits recorded so far.
    pub fn timeline(&self) -> ExecutionTimeline {
        self.timeline.clone()
    }

    /// Waits for the run to settle.
    pub async fn wait(self) -> Result<Outcome> {
        self.result.await.unwrap_or(Err(FlowError::Abandoned))
    }
}

/// The run's side of a [`RunHandle`].
pub(crate) struct RunLink {
    pub(crate) stop: watch::Receiver<Option<Value>>,
    pub(crate) status: watch::Sender<RunStatus>,
    pub(crate) timeline: ExecutionTimeline,
    result: oneshot::Sender<Result<Outcome>>,
}

impl RunLink {
    /// Stop value requested so far, if any.
    pub(crate) fn stop_requested(&self) -> Option<Value> {
        self.stop.borrow().clone()
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        self.status.send_replace(status);
    }

    /// Publishes the terminal status, then delivers the result. Consumes
    /// the link so it happens at most once.
    pub(crate) fn settle(self, result: Result<Outcome>) {
        self.set_status(RunStatus::settled(&result));
        // The caller may have dropped the handle; nobody is left to tell.
        let _ = self.result.send(result);
    }
}
