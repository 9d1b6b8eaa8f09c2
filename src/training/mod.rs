//! Training module
//!
//! Two-phase fine-tuning of the crop disease classifier on images streamed
//! from object storage:
//! - `config`: hyperparameters
//! - `callbacks`: checkpointing, early stopping, LR scheduling, CSV log
//! - `metrics`: cross-entropy loss and accuracy bookkeeping
//! - `trainer`: the training loop and artifact persistence

pub mod callbacks;
pub mod config;
pub mod metrics;
pub mod trainer;

pub use callbacks::{CheckpointSaver, CsvLogger, EarlyStopping, EpochRecord, ReduceLrOnPlateau, StopDecision};
pub use config::TrainingConfig;
pub use metrics::{categorical_cross_entropy, EvalMetrics, MetricAccumulator};
pub use trainer::{
    resolve_dataset, run_training, save_artifacts, OutputLocation, Phase, Trainer, TrainingOptions,
    TrainingSummary, CLASS_NAMES_FILE, METRICS_FILE, TRAINING_LOG_FILE,
};

/// Default model output directory when `AIP_MODEL_DIR` is unset
pub const DEFAULT_MODEL_DIR: &str = "/tmp/model";

/// Default checkpoint directory when `AIP_CHECKPOINT_DIR` is unset
pub const DEFAULT_CHECKPOINT_DIR: &str = "/tmp/checkpoints";
