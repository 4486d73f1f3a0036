//! Subprocess wrappers around the batch scheduler's submit and query commands.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::{JobId, QueueSnapshot};
use crate::template::Script;

/// Thin client for the external batch scheduler.
///
/// Both commands are configurable so sites with wrapper binaries (or tests)
/// can point at something other than `sbatch`/`squeue`.
#[derive(Debug, Clone)]
pub struct SlurmClient {
    submit_command: Vec<String>,
    queue_command: Vec<String>,
}

impl Default for SlurmClient {
    fn default() -> Self {
        Self {
            submit_command: vec!["sbatch".to_string()],
            queue_command: vec![
                "squeue".to_string(),
                "-o".to_string(),
                "%.18i %.6c".to_string(),
                "--me".to_string(),
            ],
        }
    }
}

impl SlurmClient {
    pub fn new(submit_command: Vec<String>, queue_command: Vec<String>) -> Self {
        Self {
            submit_command,
            queue_command,
        }
    }

    /// Submit a script, returning the scheduler-assigned job id.
    ///
    /// The script is materialized to a transient file, the submit command is
    /// invoked with its path appended, and the last whitespace-separated
    /// token of stdout is taken as the job id.
    pub async fn submit(&self, script: &Script) -> Result<JobId> {
        let Some((program, args)) = self.submit_command.split_first() else {
            bail!("submit command is empty");
        };

        let mut file = NamedTempFile::new().context("creating transient script file")?;
        file.write_all(script.as_str().as_bytes())
            .context("writing transient script file")?;
        file.flush().context("flushing transient script file")?;

        let output = Command::new(program)
            .args(args)
            .arg(file.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("invoking submit command {program:?}"))?;

        if !output.status.success() {
            bail!(
                "submit command {program:?} failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(id) = stdout.split_whitespace().last() else {
            bail!("submit command {program:?} produced no job id: {stdout:?}");
        };

        Ok(JobId::new(id))
    }

    /// One queue listing for the current principal.
    ///
    /// Failures propagate; the queue watcher owns retry policy. The snapshot
    /// is stamped with the instant the query started, so a consumer that
    /// submitted later can tell the listing predates its job.
    pub async fn query_mine(&self) -> Result<QueueSnapshot> {
        let Some((program, args)) = self.queue_command.split_first() else {
            bail!("queue command is empty");
        };

        let started = std::time::Instant::now();
        let output = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("invoking queue command {program:?}"))?;

        if !output.status.success() {
            bail!(
                "queue command {program:?} failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(QueueSnapshot::parse(&String::from_utf8_lossy(&output.stdout))?.with_taken_at(started))
    }
}
