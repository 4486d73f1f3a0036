//! Concurrent batch submission and completion tracking.

mod metrics;
mod orchestrator;
mod tracker;
mod watcher;

pub use metrics::{BatchMetrics, BatchReporter, BatchSnapshot};
pub use orchestrator::{BatchConfig, BatchOrchestrator, BatchStats};
pub use tracker::{JobTracker, TrackerState};
pub use watcher::{QueueWatcher, SubscriberId, WatcherConfig, WatcherHandle};
