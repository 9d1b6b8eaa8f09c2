//! Crop Disease Pipeline CLI
//!
//! Entry point for dataset preparation, model training and pre-trained model
//! deployment. The HTTP inference endpoint lives in the `server` crate.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use crop_disease::backend::{backend_name, default_device, InferenceBackend, TrainingBackend};
use crop_disease::dataset::{
    prepare::{cleanup_local, find_splits, MANIFEST_NAME},
    DatasetPreparer, DatasetSource, PrepareConfig, DATASET_PREFIX, DEFAULT_DATASET,
};
use crop_disease::deploy::{deploy, DeployOptions, RecordKind, WeightsSource, DEFAULT_OUTPUT_DIR};
use crop_disease::storage::{open_store, StoreConfig, DEFAULT_BUCKET};
use crop_disease::training::{run_training, TrainingConfig, TrainingOptions, DEFAULT_CHECKPOINT_DIR, DEFAULT_MODEL_DIR};
use crop_disease::utils::format_duration;
use crop_disease::utils::logging::{init_logging, LogConfig};
use crop_disease::{PlantClassifierConfig, MODEL_PREFIX};

/// Crop disease recognition pipeline
///
/// Prepares the PlantVillage dataset in object storage, trains the
/// classifier, and deploys pre-trained models for serving.
#[derive(Parser, Debug)]
#[command(name = "crop_disease")]
#[command(version = "0.1.0")]
#[command(about = "Crop disease dataset preparation, training and deployment with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Object-store bucket (falls back to GCS_BUCKET, then the default bucket)
    #[arg(long, env = "GCS_BUCKET_NAME", global = true)]
    bucket: Option<String>,

    /// Cloud project id (falls back to CLOUD_ML_PROJECT_ID)
    #[arg(long, env = "GCP_PROJECT_ID", global = true)]
    project: Option<String>,

    /// Use a local directory as the object store
    #[arg(long, env = "STORAGE_ROOT", global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download the dataset and upload it to object storage with a manifest
    PrepareDataset {
        /// Dataset handle on Kaggle (`owner/name`)
        #[arg(long, default_value = DEFAULT_DATASET)]
        dataset: String,

        /// Use an already extracted dataset instead of downloading
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Key prefix for the uploaded images
        #[arg(long, default_value = DATASET_PREFIX)]
        prefix: String,

        /// Local manifest path
        #[arg(long, default_value = MANIFEST_NAME)]
        manifest: PathBuf,

        /// Remove local files afterwards without asking
        #[arg(long, conflicts_with = "no_cleanup")]
        cleanup: bool,

        /// Keep local files without asking
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Train the classifier on images in object storage
    Train {
        /// Model output directory or gs:// URI
        #[arg(long, env = "AIP_MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
        model_dir: String,

        /// Checkpoint directory or gs:// URI
        #[arg(long, env = "AIP_CHECKPOINT_DIR", default_value = DEFAULT_CHECKPOINT_DIR)]
        checkpoint_dir: String,

        /// Training images (key prefix or gs:// URI)
        #[arg(long, default_value = "datasets/plantvillage/train")]
        train_data: String,

        /// Validation images (key prefix or gs:// URI)
        #[arg(long, default_value = "datasets/plantvillage/val")]
        val_data: String,

        /// Total epochs across both phases
        #[arg(short, long, default_value = "50")]
        epochs: usize,

        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Learning rate of the frozen-backbone phase
        #[arg(short, long, default_value = "0.001")]
        learning_rate: f64,

        /// Backbone record to initialize from
        #[arg(long)]
        backbone_weights: Option<PathBuf>,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Training region (informational)
        #[arg(long, env = "CLOUD_ML_REGION")]
        region: Option<String>,
    },

    /// Package a published pre-trained model and upload it for serving
    Deploy {
        /// URL of the published record file
        #[arg(long, conflicts_with = "weights", required_unless_present = "weights")]
        weights_url: Option<String>,

        /// Local record file
        #[arg(long)]
        weights: Option<PathBuf>,

        /// The record holds only backbone weights
        #[arg(long)]
        backbone_only: bool,

        /// Local directory the packaged model is written to
        #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,

        /// Key prefix of the served model
        #[arg(long, default_value = MODEL_PREFIX)]
        prefix: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    let store_config = StoreConfig {
        bucket: cli
            .bucket
            .clone()
            .or_else(|| std::env::var("GCS_BUCKET").ok())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
        project_id: cli
            .project
            .clone()
            .or_else(|| std::env::var("CLOUD_ML_PROJECT_ID").ok()),
        storage_root: cli.storage_root.clone(),
    };

    match cli.command {
        Commands::PrepareDataset {
            dataset,
            source_dir,
            prefix,
            manifest,
            cleanup,
            no_cleanup,
        } => {
            let cleanup = if cleanup {
                Some(true)
            } else if no_cleanup {
                Some(false)
            } else {
                None
            };
            cmd_prepare(&store_config, &dataset, source_dir, prefix, manifest, cleanup)?;
        }

        Commands::Train {
            model_dir,
            checkpoint_dir,
            train_data,
            val_data,
            epochs,
            batch_size,
            learning_rate,
            backbone_weights,
            seed,
            region,
        } => {
            let options = TrainingOptions {
                train_prefix: train_data,
                val_prefix: val_data,
                model_dir,
                checkpoint_dir,
                backbone_weights,
                config: TrainingConfig::new()
                    .with_epochs(epochs)
                    .with_batch_size(batch_size)
                    .with_learning_rate(learning_rate)
                    .with_seed(seed),
                model_config: PlantClassifierConfig::new(),
            };
            cmd_train(&store_config, &options, region.as_deref())?;
        }

        Commands::Deploy {
            weights_url,
            weights,
            backbone_only,
            output_dir,
            prefix,
        } => {
            let source = match (weights_url, weights) {
                (Some(url), _) => WeightsSource::Url(url),
                (None, Some(path)) => WeightsSource::Path(path),
                (None, None) => anyhow::bail!("either --weights-url or --weights is required"),
            };
            let options = DeployOptions {
                kind: if backbone_only {
                    RecordKind::Backbone
                } else {
                    RecordKind::Classifier
                },
                output_dir,
                prefix,
                ..DeployOptions::new(source)
            };
            cmd_deploy(&store_config, &options)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   Crop Disease Recognition                                 |
 |   Dataset, training and deployment with Burn + Rust        |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

/// Ask a yes/no question on stdin
fn confirm(question: &str) -> Result<bool> {
    print!("{} (y/n): ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn cmd_prepare(
    store_config: &StoreConfig,
    dataset: &str,
    source_dir: Option<PathBuf>,
    prefix: String,
    manifest: PathBuf,
    cleanup: Option<bool>,
) -> Result<()> {
    println!("{}", "Preparing Dataset...".cyan().bold());

    let root = match source_dir {
        Some(dir) => {
            info!("Using local dataset at {:?}", dir);
            dir
        }
        None => DatasetSource::new(dataset)?
            .fetch()
            .with_context(|| format!("failed to fetch dataset {}", dataset))?,
    };

    for (split, dir) in find_splits(&root) {
        info!("  {} split: {:?}", split, dir);
    }

    let store = open_store(store_config)?;
    let preparer = DatasetPreparer::new(
        store,
        PrepareConfig {
            prefix: prefix.clone(),
            manifest_path: manifest.clone(),
            ..PrepareConfig::default()
        },
    );

    let summary = preparer.run(&root)?;

    println!();
    println!("{}", "Dataset Prepared:".cyan().bold());
    for (split, count) in &summary.uploaded {
        println!("  Uploaded {:>6} images to {}/{}", count, prefix, split);
    }
    for (split, count) in &summary.verified {
        println!("  Verified {:>6} objects in {}/{}", count, prefix, split);
    }
    println!("  Manifest rows: {}", summary.manifest_rows);
    println!(
        "  Location: gs://{}/{}/",
        store_config.bucket,
        prefix.trim_matches('/')
    );

    let cleanup = match cleanup {
        Some(answer) => answer,
        None => confirm("Clean up local files?")?,
    };
    if cleanup {
        cleanup_local(&manifest, &root)?;
    }

    println!("{}", "Dataset preparation complete!".green().bold());
    Ok(())
}

fn cmd_train(store_config: &StoreConfig, options: &TrainingOptions, region: Option<&str>) -> Result<()> {
    println!("{}", "Initializing Training...".green().bold());
    info!("Backend: {}", backend_name());
    info!(
        "Project: {}",
        store_config.project_id.as_deref().unwrap_or("<unset>")
    );
    info!("Region: {}", region.unwrap_or("<unset>"));
    info!("Bucket: {}", store_config.bucket);
    info!("Model directory: {}", options.model_dir);
    info!("Checkpoint directory: {}", options.checkpoint_dir);

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Epochs:          {}", options.config.epochs);
    println!("  Batch size:      {}", options.config.batch_size);
    println!("  Learning rate:   {}", options.config.learning_rate);
    println!("  Image size:      {}", options.config.image_size);
    println!();

    let store = open_store(store_config)?;
    let started = std::time::Instant::now();
    let summary = run_training::<TrainingBackend>(options, store, default_device())?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Time:               {}", format_duration(started.elapsed().as_secs_f64()));
    println!("  Epochs run:         {}", summary.history.len());
    println!("  Validation loss:    {:.4}", summary.metrics.loss);
    println!("  Validation acc:     {:.2}%", 100.0 * summary.metrics.accuracy);
    println!("  Validation top-3:   {:.2}%", 100.0 * summary.metrics.top_3_accuracy);
    println!("  Artifacts:          {:?}", summary.model_dir);
    if !summary.uploaded.is_empty() {
        println!("  Uploaded:           {} files to {}", summary.uploaded.len(), options.model_dir);
    }

    Ok(())
}

fn cmd_deploy(store_config: &StoreConfig, options: &DeployOptions) -> Result<()> {
    println!("{}", "Deploying Pre-trained Model...".cyan().bold());

    let store = open_store(store_config)?;
    let summary = deploy::<InferenceBackend>(options, store.as_ref(), &default_device())?;

    for key in &summary.uploaded {
        println!("  {} {}", "Uploaded".green(), key);
    }
    println!();
    println!("{}", "Pre-trained model deployed successfully!".green().bold());
    println!("Model location: {}", summary.location);

    Ok(())
}
