//! Per-job submit-and-await state machine.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::metrics::BatchMetrics;
use crate::slurm::{JobId, QueueSnapshot, SlurmClient};
use crate::template::Script;

/// Lifecycle of one tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Created,
    Submitted,
    AwaitingExit,
    Done,
}

/// Tracks a single script from submission until the job leaves the queue.
///
/// The tracker never queries the scheduler itself; it consumes queue
/// snapshots pushed by the shared watcher on its dedicated channel.
pub struct JobTracker {
    client: Arc<SlurmClient>,
    script: Script,
    grace: Duration,
    metrics: Arc<BatchMetrics>,
    state: TrackerState,
}

impl JobTracker {
    pub fn new(
        client: Arc<SlurmClient>,
        script: Script,
        grace: Duration,
        metrics: Arc<BatchMetrics>,
    ) -> Self {
        Self {
            client,
            script,
            grace,
            metrics,
            state: TrackerState::Created,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Submit the script, then block until a snapshot taken after submission
    /// no longer lists the job. Submission failures propagate; there are no
    /// retries at this layer.
    pub async fn run(
        mut self,
        mut snapshots: mpsc::UnboundedReceiver<QueueSnapshot>,
    ) -> Result<JobId> {
        let job_id = self
            .client
            .submit(&self.script)
            .await
            .context("job submission failed")?;
        let submitted_at = Instant::now();
        self.state = TrackerState::Submitted;
        self.metrics.add_submitted();
        tracing::debug!(job = %job_id, "submitted");

        // Give the scheduler time to register the job before the first check.
        tokio::time::sleep(self.grace).await;
        self.state = TrackerState::AwaitingExit;

        while let Some(snapshot) = snapshots.recv().await {
            if snapshot.taken_at() < submitted_at {
                continue;
            }
            if !snapshot.contains(&job_id) {
                self.state = TrackerState::Done;
                tracing::debug!(job = %job_id, "left the queue");
                return Ok(job_id);
            }
        }

        bail!("queue watcher stopped before job {job_id} left the queue");
    }
}
