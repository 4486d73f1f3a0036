//! Batch-job orchestration for a two-stage spherical-harmonic featurization
//! pipeline on Slurm clusters.
//!
//! The pipeline turns a declarative configuration into schedulable job
//! scripts, submits them to the cluster scheduler, tracks queue exits
//! through a single shared watcher, and concatenates the resulting shard
//! files before the next stage starts.
//!
//! # Architecture
//!
//! - **Template**: two-stage script rendering (container wrap + substitution)
//! - **Slurm**: subprocess wrappers for submit and queue queries
//! - **Batch**: per-job trackers, the fan-out queue watcher, the orchestrator
//! - **Merge**: shard concatenation into consolidated record tables
//! - **Pipeline**: configuration expansion into per-stage scripts
//!
//! # Usage
//!
//! ```no_run
//! use spharm_pipeline::{Config, run_pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_pipeline(config).await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod merge;
pub mod pipeline;
pub mod slurm;
pub mod template;

pub use batch::{BatchConfig, BatchOrchestrator, BatchStats};
pub use config::Config;
pub use merge::{CombineMap, MergeStats};
pub use slurm::{JobId, QueueSnapshot, SlurmClient};
pub use template::{ReplacementSet, Script};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Totals from a full pipeline run.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Feature-extraction jobs run
    pub extraction_jobs: usize,

    /// Consolidated files written by the merge
    pub merged_files: usize,

    /// Records copied during the merge
    pub merged_records: u64,

    /// Projection jobs run
    pub projection_jobs: usize,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Extraction jobs: {}, Merged: {} records into {} files, Projection jobs: {}",
            self.extraction_jobs, self.merged_records, self.merged_files, self.projection_jobs
        )
    }
}

/// Run both pipeline stages: extract features, merge shards, then project.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats> {
    config.validate()?;

    for dir in [&config.scripts.tmp_dir, &config.scripts.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let client = Arc::new(SlurmClient::new(
        config.scheduler.submit_command.clone(),
        config.scheduler.queue_command.clone(),
    ));
    let orchestrator = BatchOrchestrator::new(
        client,
        BatchConfig {
            submit_grace: Duration::from_secs(config.scheduler.submit_grace_secs),
            poll_interval: Duration::from_secs(config.scheduler.poll_interval_secs),
            retry_backoff: Duration::from_secs(config.scheduler.retry_backoff_secs),
            report_interval_secs: config.scheduler.report_interval_secs,
        },
    );

    let pipeline::ExtractionPlan { scripts, combine } = pipeline::extraction_plan(&config)?;
    let extraction_jobs = scripts.len();
    tracing::info!(
        "feature extraction: {} jobs, {} consolidated outputs",
        extraction_jobs,
        combine.len()
    );
    orchestrator.run(scripts, "feature extraction").await?;

    let merge_stats = merge::merge_shards(&combine)?;
    tracing::info!("merge complete: {merge_stats}");

    let projection_scripts = pipeline::projection_plan(&config)?;
    let projection_jobs = projection_scripts.len();
    tracing::info!("projection: {} jobs", projection_jobs);
    orchestrator
        .run(projection_scripts, "neighborhoods and projection")
        .await?;

    Ok(PipelineStats {
        extraction_jobs,
        merged_files: merge_stats.files,
        merged_records: merge_stats.records,
        projection_jobs,
    })
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
