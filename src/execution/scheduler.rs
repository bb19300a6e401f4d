//! Tick Scheduling
//!
//! The controller advances one step per tick. Where ticks come from is
//! abstracted behind [`Ticker`] so runs can be driven by a real interval or
//! stepped by hand in tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Default delay between two ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// A source of ticks.
#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick.
    ///
    /// Returns `false` once the source is shut down and no tick will ever
    /// come again.
    async fn tick(&mut self) -> bool;
}

/// Shortest period an [`IntervalTicker`] accepts; shorter ones are raised
/// to it.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Ticks on a fixed period using a Tokio interval.
///
/// Every tick fires one full period after the previous `tick` call, so a
/// step that takes longer than the period still gets a full gap before the
/// next one runs.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// Creates a ticker. A zero period is raised to [`MIN_TICK`].
    pub fn new(period: Duration) -> Self {
        let period = period.max(MIN_TICK);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        // Measure the gap from the end of the previous step, not from the
        // previous deadline
        self.interval.reset();
        self.interval.tick().await;
        true
    }
}

/// Ticks only when told to through its [`TickHandle`].
///
/// Dropping every handle shuts the ticker down.
pub struct ManualTicker {
    receiver: mpsc::UnboundedReceiver<()>,
}

/// Sends ticks to a [`ManualTicker`].
#[derive(Clone)]
pub struct TickHandle {
    sender: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    pub fn new() -> (Self, TickHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { receiver }, TickHandle { sender })
    }
}

impl TickHandle {
    /// Queues one tick. Returns `false` if the ticker is gone.
    pub fn tick(&self) -> bool {
        self.sender.send(()).is_ok()
    }

    /// Queues `count` ticks.
    pub fn advance(&self, count: usize) -> bool {
        (0..count).all(|_| self.tick())
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.receiver.recv().await.is_some()
    }
}
