//! Concatenates per-job shard files into consolidated record tables.
//!
//! Each completed job writes one Arrow IPC shard. Shards sharing a combine
//! key are concatenated, in shard-list order, into one consolidated file
//! with the same schema. No deduplication or reordering is performed.

use anyhow::{bail, Context, Result};
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Combine key (consolidated file path) → ordered shard paths.
pub type CombineMap = BTreeMap<PathBuf, Vec<PathBuf>>;

/// Totals from a merge pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Consolidated files written
    pub files: usize,

    /// Records copied across all combine keys
    pub records: u64,
}

impl std::fmt::Display for MergeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} records in {} files", self.records, self.files)
    }
}

/// Merge every combine key's shards into its consolidated file.
///
/// A missing or unreadable shard fails the run; consolidated files already
/// written for earlier keys are not rolled back.
pub fn merge_shards(combine: &CombineMap) -> Result<MergeStats> {
    let mut stats = MergeStats::default();
    let total = combine.len();

    for (index, (target, shards)) in combine.iter().enumerate() {
        let records = merge_one(target, shards)
            .with_context(|| format!("merging shards into {}", target.display()))?;
        stats.files += 1;
        stats.records += records;
        tracing::info!(
            "merged {} records into {} ({}/{})",
            records,
            target.display(),
            index + 1,
            total
        );
    }

    Ok(stats)
}

/// Two-pass concatenation for one combine key: count records and capture the
/// schema, then copy each shard's batches into the consolidated file.
fn merge_one(target: &Path, shards: &[PathBuf]) -> Result<u64> {
    let mut expected = 0u64;
    let mut schema: Option<SchemaRef> = None;

    for shard in shards {
        let reader = open_shard(shard)?;
        match &schema {
            None => schema = Some(reader.schema()),
            Some(first) => {
                // The first shard's schema is authoritative.
                if reader.schema() != *first {
                    bail!(
                        "shard {} schema differs from the first shard's",
                        shard.display()
                    );
                }
            }
        }
        for batch in reader {
            expected += batch
                .with_context(|| format!("reading shard {}", shard.display()))?
                .num_rows() as u64;
        }
    }

    let Some(schema) = schema else {
        bail!("combine key has no shards");
    };

    let out = File::create(target)
        .with_context(|| format!("creating consolidated file {}", target.display()))?;
    let mut writer =
        FileWriter::try_new(out, schema.as_ref()).context("opening consolidated writer")?;

    let mut written = 0u64;
    for shard in shards {
        let reader = open_shard(shard)?;
        for batch in reader {
            let batch = batch.with_context(|| format!("reading shard {}", shard.display()))?;
            written += batch.num_rows() as u64;
            writer
                .write(&batch)
                .with_context(|| format!("appending records from {}", shard.display()))?;
        }
    }
    writer.finish().context("finalizing consolidated file")?;

    if written != expected {
        bail!("shard record counts changed between passes ({written} written, {expected} counted)");
    }

    Ok(written)
}

fn open_shard(path: &Path) -> Result<FileReader<File>> {
    let file =
        File::open(path).with_context(|| format!("opening shard {}", path.display()))?;
    FileReader::try_new(file, None).with_context(|| format!("reading shard {}", path.display()))
}
