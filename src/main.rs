//! Grassfier CLI
//!
//! Entry point for preparing the dataset, training a classifier, labeling
//! images and inspecting a processed dataset.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use grassfier::backend::{backend_name, cpu_device, select_device, CpuBackend, CpuTrainingBackend};
use grassfier::config::PipelineConfig;
use grassfier::dataset::{prepare_dataset, DatasetStats};
use grassfier::inference::{Predictor, DEFAULT_TOP_K};
use grassfier::model::ModelVariant;
use grassfier::training::{run_training, ConsoleReporter, TrainingReport, BEST_CHECKPOINT_FILE};
use grassfier::utils::logging::{config_from_flags, init_logging};

/// Grass species image classification with Burn
#[derive(Parser, Debug)]
#[command(name = "grassfier")]
#[command(version)]
#[command(about = "Split, train and run grass image classifiers", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split the raw collection into train/val/test and copy it
    Prepare {
        /// Raw dataset root (one directory per class)
        #[arg(long)]
        raw: Option<PathBuf>,

        /// Destination of the processed tree
        #[arg(long)]
        processed: Option<PathBuf>,

        /// Shuffle seed
        #[arg(long)]
        seed: Option<u64>,

        /// Remove the processed tree before copying
        #[arg(long)]
        clean: bool,
    },

    /// Train a classifier on the processed dataset
    Train {
        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// simple or transfer
        #[arg(short, long)]
        model: Option<ModelVariant>,

        /// Backbone record for the transfer model; implies pretrained
        #[arg(long)]
        pretrained_weights: Option<PathBuf>,

        /// Write the per-epoch history to this JSON file
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Predict the class of an image
    Predict {
        image: PathBuf,

        /// Training output directory
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Use the best checkpoint instead of the final model
        #[arg(long)]
        checkpoint: bool,

        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },

    /// Show per-split, per-class image counts
    Stats {
        #[arg(long)]
        processed: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = config_from_flags(cli.verbose, cli.quiet);
    let _ = init_logging(&log_config);

    let mut config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Prepare {
            raw,
            processed,
            seed,
            clean,
        } => {
            if let Some(raw) = raw {
                config.paths.raw_dir = raw;
            }
            if let Some(processed) = processed {
                config.paths.processed_dir = processed;
            }
            if seed.is_some() {
                config.split.seed = seed;
            }
            cmd_prepare(&config, clean)?;
        }

        Commands::Train {
            epochs,
            batch_size,
            lr,
            model,
            pretrained_weights,
            history,
        } => {
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.data.batch_size = batch_size;
            }
            if let Some(lr) = lr {
                config.training.learning_rate = lr;
            }
            if let Some(model) = model {
                config.model.variant = model;
            }
            if let Some(weights) = pretrained_weights {
                config.model.pretrained = true;
                config.model.pretrained_weights = Some(weights);
            }
            config.validate().context("Invalid configuration")?;
            cmd_train(&config, history.as_deref())?;
        }

        Commands::Predict {
            image,
            model_dir,
            checkpoint,
            top_k,
        } => {
            let model_dir = model_dir.unwrap_or_else(|| config.paths.output_dir.clone());
            cmd_predict(&image, &model_dir, checkpoint, top_k)?;
        }

        Commands::Stats { processed } => {
            let processed = processed.unwrap_or_else(|| config.paths.processed_dir.clone());
            cmd_stats(&processed)?;
        }
    }

    Ok(())
}

fn cmd_prepare(config: &PipelineConfig, clean: bool) -> Result<()> {
    let raw = &config.paths.raw_dir;
    let processed = &config.paths.processed_dir;
    let ratios = config.split.ratios()?;

    if clean && processed.exists() {
        warn!("Removing existing processed dataset at {:?}", processed);
        std::fs::remove_dir_all(processed)
            .with_context(|| format!("Failed to clear {}", processed.display()))?;
    }

    println!("{}", "Preparing Dataset...".cyan().bold());
    let report = prepare_dataset(raw, processed, &ratios, config.split.seed)
        .with_context(|| format!("Failed to prepare dataset from {}", raw.display()))?;

    println!();
    print!("{}", report.manifest.stats());
    println!();
    println!(
        "  {} Copied {} images into {} (manifest: {})",
        "✓".green(),
        report.copied.total(),
        processed.display(),
        report.manifest_path.display()
    );
    Ok(())
}

fn cmd_train(config: &PipelineConfig, history_path: Option<&Path>) -> Result<()> {
    let compute = select_device();
    println!(
        "{} {} ({})",
        "Device:".cyan().bold(),
        compute,
        backend_name(&compute)
    );

    let reporter = ConsoleReporter::new();
    let report = match compute {
        #[cfg(feature = "cuda")]
        grassfier::backend::ComputeDevice::Cuda(index) => {
            let device = grassfier::backend::cuda_device(index);
            run_training::<grassfier::backend::CudaTrainingBackend>(config, compute, &device, &reporter)?
        }
        _ => run_training::<CpuTrainingBackend>(config, compute, &cpu_device(), &reporter)?,
    };

    if let Some(path) = history_path {
        report.history.save(path)?;
    }
    print_training_summary(&report);
    Ok(())
}

fn print_training_summary(report: &TrainingReport) {
    println!();
    println!("{}", "Results:".cyan().bold());
    println!(
        "  Best val accuracy: {:.2}% (epoch {})",
        report.history.best_val_accuracy * 100.0,
        report.history.best_epoch.unwrap_or(0)
    );
    println!(
        "  Test accuracy:     {:.2}% ({}/{})",
        report.test.accuracy * 100.0,
        report.test.correct,
        report.test.total
    );
    println!("  Classes:           {}", report.classes.len());
    println!("  Final model:       {}", report.final_model_path().display());
    println!(
        "  Best checkpoint:   {}",
        report.output_dir.join(BEST_CHECKPOINT_FILE).display()
    );
    if report.history.epochs.iter().any(|m| !m.is_valid()) {
        println!(
            "  {} some epochs ran on an empty split and are not meaningful",
            "Warning:".yellow()
        );
    }
}

fn cmd_predict(
    image: &Path,
    model_dir: &Path,
    use_checkpoint: bool,
    top_k: usize,
) -> Result<()> {
    info!("Classifying {:?} with model from {:?}", image, model_dir);
    let device = cpu_device();

    let predictor = if use_checkpoint {
        Predictor::<CpuBackend>::from_checkpoint(model_dir, &model_dir.join(BEST_CHECKPOINT_FILE), &device)?
    } else {
        Predictor::<CpuBackend>::from_dir(model_dir, &device)?
    }
    .with_top_k(top_k);

    let prediction = predictor
        .predict_path(image)
        .with_context(|| format!("Failed to classify {}", image.display()))?;

    println!("{}", prediction.display());
    println!("{} {}", "Predicted:".green().bold(), prediction.label);
    Ok(())
}

fn cmd_stats(processed: &Path) -> Result<()> {
    info!("Computing dataset statistics for {:?}", processed);
    if !processed.exists() {
        println!("{} Processed dataset not found: {}", "Error:".red(), processed.display());
        println!();
        println!("Prepare it first:");
        println!("  grassfier prepare --processed {}", processed.display());
        return Ok(());
    }

    let stats = DatasetStats::from_processed(processed)?;
    stats.print();
    Ok(())
}
