//! Pipeline CLI
//!
//! Orchestrates spherical-harmonic featurization batches on a Slurm cluster.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spharm_pipeline::{build_runtime, pipeline, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "spharm-pipeline")]
#[command(about = "Orchestrate featurization batches on a Slurm cluster", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline (default if no command specified)
    Run,

    /// Show the work each stage would generate without submitting
    Plan,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => run_command(cli.config),
        Some(Commands::Plan) => plan_command(cli.config),
        Some(Commands::Validate) => validate_command(cli.config),
        Some(Commands::GenerateConfig { output }) => generate_config_command(output),
    }
}

fn run_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;

    let runtime = build_runtime(None)?;
    let stats = runtime.block_on(async { run_pipeline(config).await })?;

    tracing::info!("pipeline complete: {stats}");
    Ok(())
}

fn plan_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;

    let extraction = pipeline::extraction_plan(&config)?;
    let projection = pipeline::projection_plan(&config)?;

    println!("\n=== Work Plan ===");
    println!("Feature extraction jobs: {}", extraction.scripts.len());
    println!("Consolidated outputs: {}", extraction.combine.len());
    for (target, shards) in &extraction.combine {
        println!("  {} <- {} shards", target.display(), shards.len());
    }
    println!("Projection jobs: {}", projection.len());
    println!("=================\n");

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Featurization Pipeline Configuration

# === SCHEDULER: Batch scheduler interface ===
scheduler:
  # Submit command; the generated script path is appended
  submit_command: ["sbatch"]

  # Queue listing command, restricted to the current user
  queue_command: ["squeue", "-o", "%.18i %.6c", "--me"]

  # Seconds between queue polls (one query per interval for the whole batch)
  poll_interval_secs: 10

  # Seconds between retries of a failed queue query
  retry_backoff_secs: 120

  # Seconds between submission and the first queue check
  submit_grace_secs: 5

  # Seconds between progress reports
  report_interval_secs: 30

  # Scheduler directive values available to templates, e.g. {{account}}
  options:
    account: "stf"
    partition: "ckpt"
    nodes: "1"

# === CONTAINER: How commands are wrapped ===
container:
  # Template lines carrying a {{run_<name>}} placeholder are replaced by this
  # invocation with {{cmd}} renamed to {{<name>}}
  invocation: |
    apptainer exec \
    --bind /gscratch \
    /containers/pipeline.sif /bin/bash -l -c \
    "{{cmd}}"
  prefix: "run_"

# === SCRIPTS: Shared across stages ===
scripts:
  # Per-job shard files and consolidated outputs land here
  tmp_dir: "/gscratch/scratch/shards"

  # Final stage outputs land here
  output_dir: "/gscratch/scratch/final"

  # Data splits and the file indices enumerated per split
  splits:
    train:
      file_indices: [0, 1, 2, 3]
    val:
      file_indices: [0]

  # Command strings available to templates. Per-unit values (split, file
  # index, line offset, seed, manifest, shard) are exported as environment
  # variables by the stage templates, so commands read them from the
  # environment rather than embedding placeholders of their own.
  commands:
    extract: "featurize-structures --manifest $MANIFEST --start-line $LINE_IDX --count $CHUNK_SIZE --output $SHARD"
    project: "project-neighborhoods --features $FEATURES --seed $SEED --output-dir $OUTPUT_DIR"

# === EXTRACTION: Stage one ===
extraction:
  # Job script template
  template: "templates/extract.slurm"

  # Manifest path template; one manifest per (split, file index)
  manifest: "/data/manifests/{{split}}_{{file_idx}}.txt"

  # Manifest lines handled per generated job
  chunk_size: 1000

  # Extra template values for this stage
  options: {}

# === PROJECTION: Stage two ===
projection:
  # Job script template
  template: "templates/project.slurm"

  # Noise seeds; one job per (split, file index, seed)
  seeds: [0]

  # Extra template values for this stage
  options: {}
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
