//! Configuration for the batch pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::template::CMD_SLOT;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Batch scheduler interface and directive values
    pub scheduler: SchedulerConfig,

    /// Container invocation wrapping
    pub container: ContainerConfig,

    /// Script generation shared across stages
    pub scripts: ScriptsConfig,

    /// Feature-extraction stage
    pub extraction: ExtractionConfig,

    /// Neighborhood + projection stage
    pub projection: ProjectionConfig,
}

/// Batch scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Submit command; the script path is appended as the last argument
    #[serde(default = "default_submit_command")]
    pub submit_command: Vec<String>,

    /// Queue listing command, restricted to the current user
    #[serde(default = "default_queue_command")]
    pub queue_command: Vec<String>,

    /// Seconds between queue polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds between retries of a failed queue query
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Seconds between submission and the first queue check
    #[serde(default = "default_submit_grace")]
    pub submit_grace_secs: u64,

    /// Seconds between progress reports
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Scheduler directive values available to templates
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Container invocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Invocation template; must contain `{{cmd}}`
    pub invocation: String,

    /// Placeholder prefix marking template lines to wrap
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// Script generation shared across stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Directory for per-job shard files and consolidated outputs
    pub tmp_dir: PathBuf,

    /// Directory for final stage outputs
    pub output_dir: PathBuf,

    /// Data splits and their file indices
    pub splits: BTreeMap<String, SplitConfig>,

    /// Command strings available to templates
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

/// One data split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// File indices enumerated for this split
    pub file_indices: Vec<u32>,
}

/// Feature-extraction stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Job script template path
    pub template: PathBuf,

    /// Manifest path template; may reference `{{split}}` and `{{file_idx}}`
    pub manifest: String,

    /// Manifest lines handled per generated job
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Stage-specific template values
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Neighborhood + projection stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Job script template path
    pub template: PathBuf,

    /// Noise seeds; one job per (split, file index, seed)
    #[serde(default = "default_seeds")]
    pub seeds: Vec<u64>,

    /// Stage-specific template values
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON.
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.submit_command.is_empty() {
            anyhow::bail!("Submit command must not be empty");
        }
        if self.scheduler.queue_command.is_empty() {
            anyhow::bail!("Queue command must not be empty");
        }
        if self.scheduler.poll_interval_secs == 0 {
            anyhow::bail!("Poll interval must be > 0");
        }
        if self.container.prefix.is_empty() {
            anyhow::bail!("Container placeholder prefix must not be empty");
        }
        if !self.container.invocation.contains(&format!("{{{{{CMD_SLOT}}}}}")) {
            anyhow::bail!(
                "Container invocation must contain {{{{{CMD_SLOT}}}}}: {}",
                self.container.invocation
            );
        }
        if self.scripts.splits.is_empty() {
            anyhow::bail!("At least one data split is required");
        }
        for (split, split_config) in &self.scripts.splits {
            if split_config.file_indices.is_empty() {
                anyhow::bail!("Split {split:?} has no file indices");
            }
        }
        if self.extraction.chunk_size == 0 {
            anyhow::bail!("Extraction chunk size must be > 0");
        }
        if self.projection.seeds.is_empty() {
            anyhow::bail!("At least one projection seed is required");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_submit_command() -> Vec<String> {
    vec!["sbatch".to_string()]
}
fn default_queue_command() -> Vec<String> {
    vec![
        "squeue".to_string(),
        "-o".to_string(),
        "%.18i %.6c".to_string(),
        "--me".to_string(),
    ]
}
fn default_poll_interval() -> u64 {
    10
}
fn default_retry_backoff() -> u64 {
    120
}
fn default_submit_grace() -> u64 {
    5
}
fn default_report_interval() -> u64 {
    30
}
fn default_prefix() -> String {
    "run_".to_string()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_seeds() -> Vec<u64> {
    vec![0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
scheduler:
  options:
    account: stf
    partition: ckpt
container:
  invocation: |
    apptainer exec /containers/pipeline.sif /bin/bash -l -c "{{cmd}}"
  prefix: "run_"
scripts:
  tmp_dir: /tmp/shards
  output_dir: /tmp/final
  splits:
    train:
      file_indices: [0, 1]
  commands:
    extract: "featurize --from-env"
extraction:
  template: templates/extract.slurm
  manifest: "/data/manifests/{{split}}_{{file_idx}}.txt"
  chunk_size: 500
projection:
  template: templates/project.slurm
  seeds: [7]
"#
    }

    #[test]
    fn test_parse_sample_yaml() {
        let config = Config::from_yaml(sample_yaml()).unwrap();

        assert_eq!(config.scheduler.submit_command, vec!["sbatch"]);
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.scheduler.retry_backoff_secs, 120);
        assert_eq!(config.scheduler.submit_grace_secs, 5);
        assert_eq!(config.container.prefix, "run_");
        assert_eq!(config.scripts.splits["train"].file_indices, vec![0, 1]);
        assert_eq!(config.extraction.chunk_size, 500);
        assert_eq!(config.projection.seeds, vec![7]);
    }

    #[test]
    fn test_sample_yaml_validates() {
        let config = Config::from_yaml(sample_yaml()).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_invocation_without_cmd() {
        let mut config = Config::from_yaml(sample_yaml()).unwrap();
        config.container.invocation = "apptainer exec pipeline.sif".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_splits() {
        let mut config = Config::from_yaml(sample_yaml()).unwrap();
        config.scripts.splits.clear();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_split_without_indices() {
        let mut config = Config::from_yaml(sample_yaml()).unwrap();
        config
            .scripts
            .splits
            .insert("val".to_string(), SplitConfig { file_indices: vec![] });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = Config::from_yaml(sample_yaml()).unwrap();
        config.extraction.chunk_size = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_seeds() {
        let mut config = Config::from_yaml(sample_yaml()).unwrap();
        config.projection.seeds.clear();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::from_yaml(sample_yaml()).unwrap();
        let yaml = config.to_yaml().unwrap();
        let reparsed = Config::from_yaml(&yaml).unwrap();

        assert_eq!(reparsed.scheduler.options, config.scheduler.options);
        assert_eq!(reparsed.extraction.chunk_size, config.extraction.chunk_size);
    }
}
