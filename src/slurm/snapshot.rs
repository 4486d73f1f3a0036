//! Queue-state snapshots and job identifiers.

use anyhow::{Context, Result};
use std::fmt;
use std::time::Instant;

/// Opaque scheduler-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `(job id, cpu count)` row of the queue listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub id: String,
    pub cpus: u32,
}

/// A point-in-time view of the caller's jobs known to the scheduler.
///
/// Stamped with the query time so consumers can discard snapshots taken
/// before their own submission completed.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    taken_at: Instant,
    rows: Vec<QueueRow>,
}

impl QueueSnapshot {
    pub fn new(rows: Vec<QueueRow>) -> Self {
        Self {
            taken_at: Instant::now(),
            rows,
        }
    }

    /// Parse queue-listing output: a header line followed by
    /// whitespace-separated `(id, cpus)` rows, possibly quoted.
    pub fn parse(output: &str) -> Result<Self> {
        let cleaned = output.replace('"', "");
        let mut rows = Vec::new();

        for line in cleaned.trim().lines().skip(1) {
            let mut fields = line.split_whitespace();
            let (Some(id), Some(cpus)) = (fields.next(), fields.next()) else {
                continue;
            };
            let cpus = cpus
                .parse()
                .with_context(|| format!("unparseable queue row: {line:?}"))?;
            rows.push(QueueRow {
                id: id.to_string(),
                cpus,
            });
        }

        Ok(Self::new(rows))
    }

    /// Override the timestamp, e.g. with the instant the query started.
    pub fn with_taken_at(mut self, taken_at: Instant) -> Self {
        self.taken_at = taken_at;
        self
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn rows(&self) -> &[QueueRow] {
        &self.rows
    }

    /// Whether the job appears in this snapshot. Array sub-jobs
    /// (`<parent>_<index>` ids) match their parent id.
    pub fn contains(&self, job: &JobId) -> bool {
        self.rows.iter().any(|row| {
            let id = row.id.split('_').next().unwrap_or_default();
            id == job.as_str()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_header() {
        let snapshot = QueueSnapshot::parse("JOBID MIN_CP\n17941698 2\n17938396 40\n").unwrap();

        assert_eq!(
            snapshot.rows(),
            &[
                QueueRow {
                    id: "17941698".to_string(),
                    cpus: 2
                },
                QueueRow {
                    id: "17938396".to_string(),
                    cpus: 40
                },
            ]
        );
    }

    #[test]
    fn test_parse_strips_quotes() {
        let snapshot = QueueSnapshot::parse("\"JOBID MIN_CP \"\n\"17941698 2 \"\n").unwrap();
        assert_eq!(snapshot.rows().len(), 1);
        assert_eq!(snapshot.rows()[0].id, "17941698");
    }

    #[test]
    fn test_parse_empty_output() {
        let snapshot = QueueSnapshot::parse("").unwrap();
        assert!(snapshot.rows().is_empty());

        let snapshot = QueueSnapshot::parse("JOBID MIN_CP\n").unwrap();
        assert!(snapshot.rows().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage_cpu_counts() {
        assert!(QueueSnapshot::parse("JOBID MIN_CP\n17941698 lots\n").is_err());
    }

    #[test]
    fn test_contains_exact_id() {
        let snapshot = QueueSnapshot::parse("JOBID MIN_CP\n17938396 40\n").unwrap();

        assert!(snapshot.contains(&JobId::new("17938396")));
        assert!(!snapshot.contains(&JobId::new("17941698")));
    }

    #[test]
    fn test_contains_matches_array_job_parent() {
        let snapshot = QueueSnapshot::parse("JOBID MIN_CP\n17941698_3 2\n").unwrap();

        assert!(snapshot.contains(&JobId::new("17941698")));
        assert!(!snapshot.contains(&JobId::new("17941698_3")));
    }
}
