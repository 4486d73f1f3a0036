//! Single shared queue-polling loop fanned out to all job trackers.
//!
//! One watcher queries the scheduler once per poll interval and broadcasts
//! the snapshot to every registered tracker, so queue load stays constant
//! regardless of batch size. The watcher is an actor: it owns the subscriber
//! map, consumers register before it spawns, and deregistration arrives as a
//! control message.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::slurm::{QueueSnapshot, SlurmClient};

/// Identifier for one registered snapshot consumer.
pub type SubscriberId = u64;

enum Control {
    Deregister(SubscriberId),
}

/// Timing knobs for the watcher loop.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between queue queries
    pub poll_interval: Duration,

    /// Delay between retries after a failed queue query
    pub retry_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(120),
        }
    }
}

/// Queue watcher in its registration phase; consumers subscribe here, then
/// [`QueueWatcher::spawn`] starts the polling loop.
pub struct QueueWatcher {
    client: Arc<SlurmClient>,
    config: WatcherConfig,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<QueueSnapshot>>,
    next_id: SubscriberId,
}

impl QueueWatcher {
    pub fn new(client: Arc<SlurmClient>, config: WatcherConfig) -> Self {
        Self {
            client,
            config,
            subscribers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register a consumer. Every snapshot the loop takes is pushed onto the
    /// returned channel until the consumer is deregistered.
    pub fn subscribe(&mut self) -> (SubscriberId, mpsc::UnboundedReceiver<QueueSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Start the polling loop.
    pub fn spawn(self) -> WatcherHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(watch_loop(
            self.client,
            self.config,
            self.subscribers,
            control_rx,
        ));
        WatcherHandle {
            control: control_tx,
            task,
        }
    }
}

/// Handle to a running watcher: deregister consumers, then join.
pub struct WatcherHandle {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Remove a consumer. The loop exits once none remain.
    pub fn deregister(&self, id: SubscriberId) {
        let _ = self.control.send(Control::Deregister(id));
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task.await.context("queue watcher task panicked")
    }
}

async fn watch_loop(
    client: Arc<SlurmClient>,
    config: WatcherConfig,
    mut subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<QueueSnapshot>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut control_open = true;

    loop {
        while let Ok(Control::Deregister(id)) = control.try_recv() {
            subscribers.remove(&id);
        }
        if subscribers.is_empty() {
            tracing::debug!("no registered consumers left, queue watcher shutting down");
            return;
        }

        let snapshot = query_with_retry(&client, config.retry_backoff).await;
        for tx in subscribers.values() {
            // A tracker that already finished has dropped its receiver.
            let _ = tx.send(snapshot.clone());
        }

        if control_open {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                message = control.recv() => match message {
                    Some(Control::Deregister(id)) => {
                        subscribers.remove(&id);
                    }
                    None => control_open = false,
                },
            }
        } else {
            tokio::time::sleep(config.poll_interval).await;
        }
    }
}

/// Queue queries are retried forever: a transient scheduler hiccup must not
/// tear down the whole batch.
async fn query_with_retry(client: &SlurmClient, backoff: Duration) -> QueueSnapshot {
    loop {
        match client.query_mine().await {
            Ok(snapshot) => return snapshot,
            Err(err) => {
                tracing::warn!("queue query failed, retrying in {:?}: {err:#}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
