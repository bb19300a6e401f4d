//! Run Monitoring Module
//!
//! Records what a run did so it can be inspected and reported.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Step start/end events of one run, bounded to the newest events

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
