//! Execution Timeline
//!
//! Records step visits of a run so callers can see the order steps ran in,
//! how long each took, and print a short report once the run is over.
//!
//! Only the most recent events are kept; a step that polls itself forever
//! must not grow the timeline without bound. Per-step durations are running
//! totals and stay exact after old events are dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Number of events a timeline keeps unless told otherwise.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Step handler was invoked
    Started,
    /// Step handler returned a directive
    Completed,
    /// Step handler or navigation failed
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Name of the step
    pub step: String,
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: Instant,
}

#[derive(Debug)]
struct Record {
    events: VecDeque<TimelineEvent>,
    capacity: usize,
    dropped: usize,
    durations: HashMap<String, Duration>,
    open: Option<(String, Instant)>,
}

/// Step visits of one run.
///
/// Clones share the same record: the controller writes into it while the
/// run handle reads from it.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    record: Arc<Mutex<Record>>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now, keeping [`DEFAULT_CAPACITY`]
    /// events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a timeline keeping at most `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            record: Arc::new(Mutex::new(Record {
                events: VecDeque::with_capacity(capacity.min(64)),
                capacity,
                dropped: 0,
                durations: HashMap::new(),
                open: None,
            })),
            start_time: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an event for a step, evicting the oldest one when full.
    pub fn add_event(&self, step: impl Into<String>, event_type: EventType) {
        let step = step.into();
        let timestamp = Instant::now();
        let mut record = self.lock();

        // Steps never overlap within a run, so a start is always closed by
        // the next completion or failure
        match event_type {
            EventType::Started => record.open = Some((step.clone(), timestamp)),
            EventType::Completed | EventType::Failed => {
                if let Some((name, started)) = record.open.take() {
                    *record.durations.entry(name).or_default() +=
                        timestamp.duration_since(started);
                }
            }
        }

        if record.events.len() == record.capacity {
            record.events.pop_front();
            record.dropped += 1;
        }
        record.events.push_back(TimelineEvent {
            step,
            event_type,
            timestamp,
        });
    }

    /// Returns a copy of the retained events, oldest first.
    pub fn get_events(&self) -> Vec<TimelineEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Names of the retained started steps in order, repeats included.
    pub fn visits(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.event_type == EventType::Started)
            .map(|e| e.step.clone())
            .collect()
    }

    /// Number of events evicted to stay within capacity.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Total time spent inside each step, summed over all its visits,
    /// evicted ones included.
    pub fn get_durations(&self) -> HashMap<String, Duration> {
        self.lock().durations.clone()
    }

    /// Plain text report: one line per retained event plus the total.
    pub fn summary(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");
        let record = self.lock();

        if record.dropped > 0 {
            output.push_str(&format!("  ({} earlier events dropped)\n", record.dropped));
        }

        for event in record.events.iter() {
            let offset = event.timestamp.duration_since(self.start_time).as_millis();
            let label = match event.event_type {
                EventType::Started => "started",
                EventType::Completed => "completed",
                EventType::Failed => "FAILED",
            };
            output.push_str(&format!("{:>8} ms  {}  {}\n", offset, truncate(&event.step, 16), label));
        }

        output.push_str(&format!("\nTotal: {} ms\n", self.elapsed().as_millis()));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a string to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert_eq!(timeline.capacity(), DEFAULT_CAPACITY);
        assert_eq!(timeline.dropped(), 0);
        assert!(timeline.get_events().is_empty());
        assert!(timeline.visits().is_empty());
    }

    #[test]
    fn test_clones_share_events() {
        let timeline = ExecutionTimeline::new();
        let writer = timeline.clone();

        writer.add_event("a", EventType::Started);
        writer.add_event("a", EventType::Completed);

        assert_eq!(timeline.get_events().len(), 2);
    }

    #[test]
    fn test_visits_keep_repeats() {
        let timeline = ExecutionTimeline::new();
        for step in ["a", "b", "a", "b", "c"] {
            timeline.add_event(step, EventType::Started);
            timeline.add_event(step, EventType::Completed);
        }

        assert_eq!(timeline.visits(), vec!["a", "b", "a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_durations_sum_visits() {
        let timeline = ExecutionTimeline::new();

        timeline.add_event("retry", EventType::Started);
        time::advance(Duration::from_millis(30)).await;
        timeline.add_event("retry", EventType::Completed);
        timeline.add_event("retry", EventType::Started);
        time::advance(Duration::from_millis(20)).await;
        timeline.add_event("retry", EventType::Failed);

        let durations = timeline.get_durations();
        assert_eq!(durations["retry"], Duration::from_millis(50));
    }

    #[test]
    fn test_durations_ignore_open_start() {
        let timeline = ExecutionTimeline::new();
        timeline.add_event("step1", EventType::Started);

        assert!(timeline.get_durations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let timeline = ExecutionTimeline::with_capacity(4);

        for _ in 0..10 {
            timeline.add_event("poll", EventType::Started);
            time::advance(Duration::from_millis(5)).await;
            timeline.add_event("poll", EventType::Completed);
        }

        assert_eq!(timeline.get_events().len(), 4);
        assert_eq!(timeline.visits().len(), 2);
        assert_eq!(timeline.dropped(), 16);
        // Durations still cover every visit
        assert_eq!(timeline.get_durations()["poll"], Duration::from_millis(50));
        assert!(timeline.summary().contains("16 earlier events dropped"));
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let timeline = ExecutionTimeline::with_capacity(0);
        timeline.add_event("a", EventType::Started);
        timeline.add_event("a", EventType::Completed);

        assert_eq!(timeline.capacity(), 1);
        assert_eq!(timeline.get_events()[0].event_type, EventType::Completed);
    }

    #[test]
    fn test_summary_lists_events() {
        let timeline = ExecutionTimeline::new();
        timeline.add_event("step1", EventType::Started);
        timeline.add_event("step1", EventType::Failed);

        let summary = timeline.summary();
        assert!(summary.contains("step1"));
        assert!(summary.contains("FAILED"));
        assert!(summary.contains("Total:"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("ab", 4), "ab  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
