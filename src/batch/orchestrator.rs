//! Submits a batch of scripts and blocks until every job leaves the queue.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::metrics::{BatchMetrics, BatchReporter};
use super::tracker::JobTracker;
use super::watcher::{QueueWatcher, WatcherConfig};
use crate::slurm::{JobId, SlurmClient};
use crate::template::Script;

/// Timing configuration for batch runs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Delay between submission and the first queue check
    pub submit_grace: Duration,

    /// Queue polling interval
    pub poll_interval: Duration,

    /// Backoff between retries of a failed queue query
    pub retry_backoff: Duration,

    /// Seconds between progress reports
    pub report_interval_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            submit_grace: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(120),
            report_interval_secs: 30,
        }
    }
}

/// Outcome of one tracked job, delivered on the shared completion channel.
struct JobOutcome {
    index: usize,
    result: Result<JobId>,
}

/// Totals for a finished batch.
#[derive(Debug, Default)]
pub struct BatchStats {
    /// Jobs in the batch
    pub total_jobs: usize,

    /// Completion events observed (queue exits plus submission failures)
    pub completed: usize,

    /// Jobs whose submission failed
    pub submit_failures: usize,
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Completed: {}, Failed submissions: {}, Total: {}",
            self.completed, self.submit_failures, self.total_jobs
        )
    }
}

/// Runs one batch: a tracker task per script, one shared queue watcher, and
/// a completion channel the orchestrator drains until every job reports in.
pub struct BatchOrchestrator {
    client: Arc<SlurmClient>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<SlurmClient>, config: BatchConfig) -> Self {
        Self { client, config }
    }

    /// Submit every script and return once all jobs have left the queue.
    ///
    /// Completions arrive in actual queue-exit order, not submission order.
    /// A job whose submission fails still produces a completion event so the
    /// count converges; the first such error fails the batch after all jobs
    /// have drained. "Done" means "left the queue"; scheduler-side job
    /// failure is indistinguishable from success here.
    pub async fn run(&self, scripts: Vec<Script>, name: &str) -> Result<BatchStats> {
        let total = scripts.len();
        if total == 0 {
            tracing::info!("{name}: no jobs to run");
            return Ok(BatchStats::default());
        }

        let metrics = BatchMetrics::new();
        let mut watcher = QueueWatcher::new(
            self.client.clone(),
            WatcherConfig {
                poll_interval: self.config.poll_interval,
                retry_backoff: self.config.retry_backoff,
            },
        );

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<JobOutcome>();
        let mut subscriptions = Vec::with_capacity(total);
        let mut tasks = Vec::with_capacity(total);

        for (index, script) in scripts.into_iter().enumerate() {
            let (subscription, snapshots) = watcher.subscribe();
            subscriptions.push(subscription);

            let tracker = JobTracker::new(
                self.client.clone(),
                script,
                self.config.submit_grace,
                metrics.clone(),
            );
            let done_tx = done_tx.clone();
            tasks.push(tokio::spawn(async move {
                let result = tracker.run(snapshots).await;
                let _ = done_tx.send(JobOutcome { index, result });
            }));
        }
        drop(done_tx);

        let watcher_handle = watcher.spawn();
        tracing::info!("{name}: launched {total} jobs");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter = BatchReporter::new(
            metrics.clone(),
            self.config.report_interval_secs,
            total as u64,
        );
        let reporter_task = tokio::spawn(reporter.run(shutdown_rx));

        let mut completed = 0usize;
        let mut first_error: Option<anyhow::Error> = None;
        while completed < total {
            let Some(outcome) = done_rx.recv().await else {
                break;
            };
            completed += 1;
            metrics.add_completed();
            match outcome.result {
                Ok(job_id) => {
                    tracing::info!("{name}: job {job_id} finished ({completed}/{total})");
                }
                Err(err) => {
                    metrics.add_submit_failure();
                    tracing::error!("{name}: job #{} failed: {err:#}", outcome.index);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        for joined in futures::future::join_all(tasks).await {
            joined.context("job tracker task panicked")?;
        }
        for subscription in subscriptions {
            watcher_handle.deregister(subscription);
        }
        watcher_handle.join().await?;

        let _ = shutdown_tx.send(()).await;
        let _ = reporter_task.await;

        let stats = BatchStats {
            total_jobs: total,
            completed,
            submit_failures: metrics.snapshot().submit_failures as usize,
        };

        if let Some(err) = first_error {
            return Err(err.context(format!(
                "{name}: {} of {total} jobs failed",
                stats.submit_failures
            )));
        }

        tracing::info!("{name}: batch complete ({stats})");
        Ok(stats)
    }
}
