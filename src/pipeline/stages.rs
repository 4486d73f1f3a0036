//! Expands configuration into per-stage job scripts.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::merge::CombineMap;
use crate::template::{self, ReplacementSet, Script};

/// Scripts and shard bookkeeping for the feature-extraction stage.
#[derive(Debug, Default)]
pub struct ExtractionPlan {
    /// One script per (split, file index, line chunk)
    pub scripts: Vec<Script>,

    /// Consolidated file → shard files its jobs will write
    pub combine: CombineMap,
}

/// Enumerate feature-extraction jobs: one per manifest line chunk.
///
/// Each (split, file index) pair owns one combine key; every line chunk of
/// its manifest contributes one script and one shard to that key.
pub fn extraction_plan(config: &Config) -> Result<ExtractionPlan> {
    let stage_template = read_template(&config.extraction.template)?;
    let mut plan = ExtractionPlan::default();
    let mut unit = 0usize;

    for (split, split_config) in &config.scripts.splits {
        for &file_idx in &split_config.file_indices {
            let manifest = manifest_path(config, split, file_idx)?;
            let lines = count_lines(&manifest)?;
            if lines == 0 {
                tracing::warn!("manifest {manifest} is empty, skipping {split}/{file_idx}");
                continue;
            }

            let combine_key = config
                .scripts
                .tmp_dir
                .join(format!("{split}_features_{file_idx}.arrow"));
            let shards = plan.combine.entry(combine_key).or_default();

            let mut line_idx = 1;
            while line_idx <= lines {
                let shard = config
                    .scripts
                    .tmp_dir
                    .join(format!("{split}_features_{file_idx}_{line_idx}.arrow"));

                let mut replacements = base_replacements(config, &config.extraction.options);
                replacements.set("split", split);
                replacements.set("file_idx", file_idx);
                replacements.set("line_idx", line_idx);
                replacements.set("i", unit);
                replacements.set("chunk_size", config.extraction.chunk_size);
                replacements.set("manifest", &manifest);
                replacements.set("shard", shard.display());

                plan.scripts.push(
                    template::render(
                        &stage_template,
                        &config.container.invocation,
                        &config.container.prefix,
                        &replacements,
                    )
                    .with_context(|| {
                        format!("rendering extraction script for {split}/{file_idx}/{line_idx}")
                    })?,
                );

                shards.push(shard);
                unit += 1;
                line_idx += config.extraction.chunk_size;
            }
        }
    }

    Ok(plan)
}

/// Enumerate projection jobs: one per (split, file index, noise seed).
pub fn projection_plan(config: &Config) -> Result<Vec<Script>> {
    let stage_template = read_template(&config.projection.template)?;
    let mut scripts = Vec::new();
    let mut unit = 0usize;

    for (split, split_config) in &config.scripts.splits {
        for &file_idx in &split_config.file_indices {
            for &seed in &config.projection.seeds {
                let features = config
                    .scripts
                    .tmp_dir
                    .join(format!("{split}_features_{file_idx}.arrow"));

                let mut replacements = base_replacements(config, &config.projection.options);
                replacements.set("split", split);
                replacements.set("file_idx", file_idx);
                replacements.set("seed", seed);
                replacements.set("i", unit);
                replacements.set("features", features.display());

                scripts.push(
                    template::render(
                        &stage_template,
                        &config.container.invocation,
                        &config.container.prefix,
                        &replacements,
                    )
                    .with_context(|| {
                        format!("rendering projection script for {split}/{file_idx}/seed {seed}")
                    })?,
                );
                unit += 1;
            }
        }
    }

    Ok(scripts)
}

/// Layer the shared configuration sections; later layers win.
fn base_replacements(config: &Config, stage_options: &BTreeMap<String, String>) -> ReplacementSet {
    ReplacementSet::new()
        .layer(stage_options.clone())
        .layer(config.scheduler.options.clone())
        .layer(scripts_layer(config))
        .layer(config.scripts.commands.clone())
}

fn scripts_layer(config: &Config) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "tmp_dir".to_string(),
            config.scripts.tmp_dir.display().to_string(),
        ),
        (
            "output_dir".to_string(),
            config.scripts.output_dir.display().to_string(),
        ),
    ])
}

/// Render the manifest path for one (split, file index) pair.
fn manifest_path(config: &Config, split: &str, file_idx: u32) -> Result<String> {
    let mut replacements = ReplacementSet::new();
    replacements.set("split", split);
    replacements.set("file_idx", file_idx);
    template::substitute(&config.extraction.manifest, &replacements)
        .with_context(|| format!("rendering manifest path for {split}/{file_idx}"))
}

fn count_lines(path: &str) -> Result<usize> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading manifest {path}"))?;
    Ok(contents.lines().count())
}

fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading template {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ContainerConfig, ExtractionConfig, ProjectionConfig, SchedulerConfig, ScriptsConfig,
        SplitConfig,
    };
    use tempfile::TempDir;

    const EXTRACT_TEMPLATE: &str = "\
#!/bin/bash
#SBATCH --account={{account}}
#SBATCH --job-name=extract-{{i}}

export MANIFEST={{manifest}}
export LINE_IDX={{line_idx}}
export CHUNK_SIZE={{chunk_size}}
export SHARD={{shard}}

{{run_extract}}

exit 0
";

    const PROJECT_TEMPLATE: &str = "\
#!/bin/bash
#SBATCH --account={{account}}

export FEATURES={{features}}
export SEED={{seed}}
export OUTPUT_DIR={{output_dir}}

{{run_project}}

exit 0
";

    fn test_config(dir: &TempDir, file_indices: Vec<u32>, manifest_lines: usize) -> Config {
        let extract_template = dir.path().join("extract.slurm");
        let project_template = dir.path().join("project.slurm");
        std::fs::write(&extract_template, EXTRACT_TEMPLATE).unwrap();
        std::fs::write(&project_template, PROJECT_TEMPLATE).unwrap();

        for &file_idx in &file_indices {
            let manifest = dir.path().join(format!("train_{file_idx}.txt"));
            let contents = (0..manifest_lines)
                .map(|n| format!("entry-{n}\n"))
                .collect::<String>();
            std::fs::write(&manifest, contents).unwrap();
        }

        Config {
            scheduler: SchedulerConfig {
                submit_command: vec!["sbatch".to_string()],
                queue_command: vec!["squeue".to_string()],
                poll_interval_secs: 10,
                retry_backoff_secs: 120,
                submit_grace_secs: 5,
                report_interval_secs: 30,
                options: BTreeMap::from([("account".to_string(), "stf".to_string())]),
            },
            container: ContainerConfig {
                invocation: "apptainer exec /c/pipeline.sif /bin/bash -l -c \"{{cmd}}\""
                    .to_string(),
                prefix: "run_".to_string(),
            },
            scripts: ScriptsConfig {
                tmp_dir: dir.path().join("shards"),
                output_dir: dir.path().join("final"),
                splits: BTreeMap::from([(
                    "train".to_string(),
                    SplitConfig { file_indices },
                )]),
                commands: BTreeMap::from([
                    ("extract".to_string(), "featurize --from-env".to_string()),
                    ("project".to_string(), "project --from-env".to_string()),
                ]),
            },
            extraction: ExtractionConfig {
                template: extract_template,
                manifest: format!("{}/{{{{split}}}}_{{{{file_idx}}}}.txt", dir.path().display()),
                chunk_size: 1000,
                options: BTreeMap::new(),
            },
            projection: ProjectionConfig {
                template: project_template,
                seeds: vec![7],
                options: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn test_extraction_one_script_per_chunk() {
        let dir = TempDir::new().unwrap();
        // Two file indices, three-line manifests, chunk size 1000: one chunk each.
        let config = test_config(&dir, vec![0, 1], 3);

        let plan = extraction_plan(&config).unwrap();

        assert_eq!(plan.scripts.len(), 2);
        assert_eq!(plan.combine.len(), 2);
        for shards in plan.combine.values() {
            assert_eq!(shards.len(), 1);
        }
    }

    #[test]
    fn test_extraction_chunks_long_manifests() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, vec![0], 25);
        config.extraction.chunk_size = 10;

        let plan = extraction_plan(&config).unwrap();

        // Lines 1, 11, 21.
        assert_eq!(plan.scripts.len(), 3);
        let shards = plan.combine.values().next().unwrap();
        assert_eq!(shards.len(), 3);
        assert!(shards[0].to_string_lossy().ends_with("train_features_0_1.arrow"));
        assert!(shards[2].to_string_lossy().ends_with("train_features_0_21.arrow"));
    }

    #[test]
    fn test_extraction_scripts_are_fully_rendered() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, vec![0], 3);

        let plan = extraction_plan(&config).unwrap();
        let script = plan.scripts[0].as_str();

        assert!(script.contains("--account=stf"));
        assert!(script.contains("LINE_IDX=1"));
        assert!(script.contains("\"featurize --from-env\""));
        assert!(script.contains("train_features_0_1.arrow"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn test_extraction_skips_empty_manifests() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, vec![0], 0);

        let plan = extraction_plan(&config).unwrap();

        assert!(plan.scripts.is_empty());
        assert!(plan.combine.is_empty());
    }

    #[test]
    fn test_extraction_fails_on_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, vec![0], 3);
        config.extraction.manifest = format!("{}/missing_{{{{split}}}}.txt", dir.path().display());

        assert!(extraction_plan(&config).is_err());
    }

    #[test]
    fn test_projection_one_script_per_seed() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, vec![0, 1], 3);
        config.projection.seeds = vec![7, 8];

        let scripts = projection_plan(&config).unwrap();

        // 1 split x 2 file indices x 2 seeds.
        assert_eq!(scripts.len(), 4);
        assert!(scripts[0].as_str().contains("SEED=7"));
        assert!(scripts[1].as_str().contains("SEED=8"));
        assert!(scripts[0].as_str().contains("train_features_0.arrow"));
    }

    #[test]
    fn test_projection_scripts_reference_stage_one_outputs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, vec![0], 3);

        let extraction = extraction_plan(&config).unwrap();
        let projection = projection_plan(&config).unwrap();

        // The projection input is exactly the extraction combine key.
        let combine_key = extraction.combine.keys().next().unwrap();
        assert!(projection[0]
            .as_str()
            .contains(&combine_key.display().to_string()));
    }

    #[test]
    fn test_stage_options_are_overridden_by_unit_keys() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, vec![0], 3);
        // A stage option colliding with a unit key loses to the unit value.
        config
            .extraction
            .options
            .insert("line_idx".to_string(), "999".to_string());

        let plan = extraction_plan(&config).unwrap();
        assert!(plan.scripts[0].as_str().contains("LINE_IDX=1"));
    }
}
