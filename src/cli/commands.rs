//! CLI command definitions and dispatch.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::checkpoint;
use crate::config::PipelineConfig;
use crate::exec::ToolInvoker;
use crate::pipeline::TrainingPipeline;

/// OCR model training pipeline driver.
#[derive(Parser, Debug)]
#[command(name = "ocrforge")]
#[command(about = "Trains OCR models by orchestrating the external training toolchain")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full training pipeline.
    Train(TrainArgs),

    /// Pick the lowest-loss checkpoint from a directory.
    SelectCheckpoint(SelectCheckpointArgs),

    /// Check that every required external tool is installed.
    Doctor,
}

/// Arguments for `ocrforge train`.
///
/// Every option falls back to the matching `OCRFORGE_*` environment
/// variable, then to the built-in default.
#[derive(Parser, Debug)]
pub struct TrainArgs {
    /// Text file with one sample record per line.
    #[arg(short = 's', long)]
    pub samples_file: Option<PathBuf>,

    /// Maximum number of samples to use (0 = unlimited).
    #[arg(short = 'n', long)]
    pub num_samples: Option<usize>,

    /// Comma-separated font names; the first usable one is chosen.
    #[arg(long)]
    pub fonts: Option<String>,

    /// Tesseract language code (e.g. chi_sim, eng).
    #[arg(short = 'l', long)]
    pub lang: Option<String>,

    /// Directory searched by the rendering tool for font files.
    #[arg(long)]
    pub fonts_dir: Option<PathBuf>,

    /// Directory holding `<lang>.traineddata`.
    #[arg(long)]
    pub tessdata_dir: Option<PathBuf>,

    /// Directory for rendered samples and the training manifest.
    #[arg(long)]
    pub ground_truth_dir: Option<PathBuf>,

    /// Directory for the extracted base model and checkpoints.
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Directory for the final packaged model.
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Name of the model being trained.
    #[arg(short = 'm', long)]
    pub model_name: Option<String>,

    /// Training iteration cap.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Maximum number of concurrently running batch tasks.
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Fraction of batch tasks that must succeed for a stage to advance.
    #[arg(long)]
    pub min_success_ratio: Option<f64>,

    /// Run log path.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Delete intermediate artifacts after packaging.
    #[arg(long)]
    pub clean: bool,
}

/// Arguments for `ocrforge select-checkpoint`.
#[derive(Parser, Debug)]
pub struct SelectCheckpointArgs {
    /// Directory to scan for checkpoint files.
    #[arg(short = 'd', long, default_value = "./data/model")]
    pub dir: PathBuf,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses CLI arguments and dispatches to the requested command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Dispatches an already-parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Train(args) => train(args).await,
        Commands::SelectCheckpoint(args) => select_checkpoint(args),
        Commands::Doctor => doctor(),
    }
}

async fn train(args: TrainArgs) -> anyhow::Result<()> {
    let config = build_config(args).context("Invalid configuration")?;

    info!(
        samples_file = %config.samples_file.display(),
        lang = %config.lang,
        model_name = %config.model_name,
        max_parallel = config.max_parallel,
        "Starting training pipeline"
    );

    let pipeline = TrainingPipeline::new(config)?;
    let report = pipeline.run().await?;

    if let Some(model) = &report.packaged_model {
        println!("Packaged model: {}", model.display());
    }
    if let (Some(ckpt), Some(loss)) = (&report.best_checkpoint, report.best_loss) {
        println!("Best checkpoint: {} (loss {})", ckpt.display(), loss);
    }
    println!("Run id: {}", report.run_id);

    Ok(())
}

fn select_checkpoint(args: SelectCheckpointArgs) -> anyhow::Result<()> {
    let best = checkpoint::select_best(&args.dir)
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;

    match best {
        Some(ckpt) => {
            println!("{} (loss {})", ckpt.path.display(), ckpt.loss);
            Ok(())
        }
        None => bail!("No parseable checkpoint files in {}", args.dir.display()),
    }
}

fn doctor() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    let invoker = ToolInvoker::new();

    for command in config.tools.required() {
        match crate::exec::locate(command) {
            Some(path) => println!("ok       {} -> {}", command, path.display()),
            None => println!("MISSING  {}", command),
        }
    }

    invoker
        .check_required(&config.tools.required())
        .context("Some required external tools are not installed")?;

    println!("All required tools are installed.");
    Ok(())
}

/// Applies CLI overrides on top of the environment-derived configuration.
fn build_config(args: TrainArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;

    if let Some(path) = args.samples_file {
        config.samples_file = path;
    }
    if let Some(n) = args.num_samples {
        config.num_samples = n;
    }
    if let Some(fonts) = args.fonts {
        config.fonts = fonts.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(lang) = args.lang {
        config.lang = lang;
    }
    if let Some(dir) = args.fonts_dir {
        config.fonts_dir = dir;
    }
    if let Some(dir) = args.tessdata_dir {
        config.tessdata_dir = dir;
    }
    if let Some(dir) = args.ground_truth_dir {
        config.ground_truth_dir = dir;
    }
    if let Some(dir) = args.model_dir {
        config.model_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(name) = args.model_name {
        config.model_name = name;
    }
    if let Some(n) = args.max_iterations {
        config.max_iterations = n;
    }
    if let Some(n) = args.max_parallel {
        config.max_parallel = n;
    }
    if let Some(ratio) = args.min_success_ratio {
        config.min_success_ratio = ratio;
    }
    if let Some(path) = args.log_file {
        config.log_file = path;
    }
    if args.clean {
        config.keep_intermediates = false;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_train_overrides() {
        let cli = Cli::parse_from([
            "ocrforge",
            "train",
            "--samples-file",
            "/tmp/input.txt",
            "-n",
            "5",
            "--fonts",
            "DejaVu Sans, Noto Sans CJK SC",
            "--lang",
            "eng",
            "--clean",
        ]);

        match cli.command {
            Commands::Train(args) => {
                assert_eq!(args.samples_file, Some(PathBuf::from("/tmp/input.txt")));
                assert_eq!(args.num_samples, Some(5));
                assert_eq!(args.lang.as_deref(), Some("eng"));
                assert!(args.clean);

                let config = build_config(args).unwrap();
                assert_eq!(config.num_samples, 5);
                assert_eq!(
                    config.fonts,
                    vec!["DejaVu Sans".to_string(), "Noto Sans CJK SC".to_string()]
                );
                assert!(!config.keep_intermediates);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["ocrforge", "doctor"]);
        assert_eq!(cli.log_level, "info");
        assert!(matches!(cli.command, Commands::Doctor));
    }

    #[test]
    fn test_select_checkpoint_default_dir() {
        let cli = Cli::parse_from(["ocrforge", "select-checkpoint"]);
        match cli.command {
            Commands::SelectCheckpoint(args) => {
                assert_eq!(args.dir, PathBuf::from("./data/model"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_build_config_rejects_invalid_ratio() {
        let cli = Cli::parse_from(["ocrforge", "train", "--min-success-ratio", "2.0"]);
        match cli.command {
            Commands::Train(args) => assert!(build_config(args).is_err()),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
