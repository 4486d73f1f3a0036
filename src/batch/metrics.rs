//! Batch progress counters and periodic reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

/// Counters for one batch run.
#[derive(Debug)]
pub struct BatchMetrics {
    /// Jobs successfully handed to the scheduler
    pub submitted: AtomicU64,

    /// Jobs that have left the queue (or failed to submit)
    pub completed: AtomicU64,

    /// Jobs whose submission failed
    pub submit_failures: AtomicU64,

    start_time: Instant,
}

impl BatchMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            submit_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn add_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_submit_failure(&self) {
        self.submit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            submit_failures: self.submit_failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

/// Snapshot of batch counters at a point in time.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub submit_failures: u64,
    pub elapsed: Duration,
}

impl std::fmt::Display for BatchSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} done, {} submitted, {} failed, elapsed {:.1}s",
            self.completed,
            self.submitted,
            self.submit_failures,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Periodic progress reporter for a running batch.
pub struct BatchReporter {
    metrics: Arc<BatchMetrics>,
    interval_secs: u64,
    total_jobs: u64,
}

impl BatchReporter {
    pub fn new(metrics: Arc<BatchMetrics>, interval_secs: u64, total_jobs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_jobs,
        }
    }

    /// Log progress on an interval until the shutdown channel fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!(
                        "[{}/{}] {}",
                        snapshot.completed,
                        self.total_jobs,
                        snapshot
                    );
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("final: {}", snapshot);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let metrics = BatchMetrics::new();

        metrics.add_submitted();
        metrics.add_submitted();
        metrics.add_completed();
        metrics.add_submit_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.submit_failures, 1);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = BatchSnapshot {
            submitted: 10,
            completed: 7,
            submit_failures: 1,
            elapsed: Duration::from_secs(90),
        };

        let display = format!("{}", snapshot);
        assert!(display.contains("7 done"));
        assert!(display.contains("10 submitted"));
        assert!(display.contains("1 failed"));
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let metrics = BatchMetrics::new();
        let reporter = BatchReporter::new(metrics, 3600, 5);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(reporter.run(shutdown_rx));
        shutdown_tx.send(()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }
}
