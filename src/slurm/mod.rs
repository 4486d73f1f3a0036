//! Batch-scheduler interface: job submission, queue queries, snapshots.

mod client;
mod snapshot;

pub use client::SlurmClient;
pub use snapshot::{JobId, QueueRow, QueueSnapshot};
