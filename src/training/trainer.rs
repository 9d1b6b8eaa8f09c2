//! Two-phase training loop
//!
//! Phase 1 fits the classifier head with the backbone frozen. Phase 2
//! unfreezes the backbone and fine-tunes everything at a lower learning
//! rate. Both phases use a manual loop over lazily fetched batches, with the
//! epoch-end callbacks from [`super::callbacks`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use chrono::Local;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use super::callbacks::{CheckpointSaver, CsvLogger, EarlyStopping, EpochRecord, ReduceLrOnPlateau};
use super::config::TrainingConfig;
use super::metrics::{categorical_cross_entropy, EvalMetrics, MetricAccumulator};
use crate::dataset::{LeafBatch, LeafBatcher, LeafItem, StoreImageDataset, CLASS_NAMES, DATASET_PREFIX};
use crate::model::{PlantClassifier, PlantClassifierConfig, MODEL_CONFIG_FILE, MODEL_FILE_STEM};
use crate::storage::{join_key, relative_key, upload_dir, GcsStore, ObjectStore, StorageUri};
use crate::utils::error::{CropDiseaseError, Result};
use crate::utils::format_duration;

/// File name of the per-epoch log inside the model directory
pub const TRAINING_LOG_FILE: &str = "training_log.csv";

/// File name of the label list inside the model directory
pub const CLASS_NAMES_FILE: &str = "class_names.json";

/// File name of the final evaluation metrics inside the model directory
pub const METRICS_FILE: &str = "metrics.json";

/// Batches between progress log lines
const LOG_EVERY_BATCHES: usize = 10;

/// Return `store` when it serves `bucket`, otherwise open that bucket on Cloud Storage
fn store_for_bucket(store: &Arc<dyn ObjectStore>, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    if store.bucket() == bucket {
        Ok(Arc::clone(store))
    } else {
        Ok(Arc::new(GcsStore::from_env(bucket)?))
    }
}

/// Resolve a dataset location (plain key prefix or `gs://` URI) to a store and key prefix
pub fn resolve_dataset(location: &str, store: &Arc<dyn ObjectStore>) -> Result<(Arc<dyn ObjectStore>, String)> {
    match StorageUri::parse(location)? {
        StorageUri::Gcs { bucket, prefix } => Ok((store_for_bucket(store, &bucket)?, prefix)),
        StorageUri::Local(path) => Ok((
            Arc::clone(store),
            path.to_string_lossy().trim_matches('/').to_string(),
        )),
    }
}

/// A local output directory, optionally mirrored to an object-store prefix
pub struct OutputLocation {
    local: PathBuf,
    remote: Option<(Arc<dyn ObjectStore>, String)>,
}

impl std::fmt::Debug for OutputLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLocation")
            .field("local", &self.local)
            .field("remote", &self.remote.as_ref().map(|(s, p)| s.uri(p)))
            .finish()
    }
}

impl OutputLocation {
    /// Resolve a local path or `gs://bucket/prefix` URI
    ///
    /// Remote locations are staged in a fresh temporary directory named after
    /// `staging_name`. The local directory is created.
    pub fn resolve(location: &str, store: &Arc<dyn ObjectStore>, staging_name: &str) -> Result<Self> {
        let output = match StorageUri::parse(location)? {
            StorageUri::Local(local) => Self { local, remote: None },
            StorageUri::Gcs { bucket, prefix } => {
                let local = std::env::temp_dir().join(format!(
                    "crop_disease_{}_{}",
                    staging_name,
                    Local::now().format("%Y%m%d_%H%M%S_%f")
                ));
                Self {
                    local,
                    remote: Some((store_for_bucket(store, &bucket)?, prefix)),
                }
            }
        };

        fs::create_dir_all(&output.local)?;
        Ok(output)
    }

    pub fn local(&self) -> &Path {
        &self.local
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Upload one file below the local directory; a no-op for local locations
    pub fn publish_file(&self, path: &Path) -> Result<Option<String>> {
        let Some((store, prefix)) = &self.remote else {
            return Ok(None);
        };

        let key = join_key(prefix, &relative_key(path, &self.local)?);
        store.put_file(&key, path)?;
        info!("Uploaded {}", store.uri(&key));
        Ok(Some(key))
    }

    /// Upload the whole local directory; a no-op for local locations
    pub fn publish_all(&self) -> Result<Vec<String>> {
        match &self.remote {
            Some((store, prefix)) => upload_dir(store.as_ref(), &self.local, prefix),
            None => Ok(Vec::new()),
        }
    }
}

/// Training phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Backbone frozen, head trained at the base learning rate
    FrozenBackbone,
    /// Everything trained at the reduced learning rate
    FineTune,
}

impl Phase {
    /// 1-based phase number used in logs
    pub fn number(&self) -> usize {
        match self {
            Phase::FrozenBackbone => 1,
            Phase::FineTune => 2,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Phase::FrozenBackbone => "training head with frozen backbone",
            Phase::FineTune => "fine-tuning full model",
        }
    }
}

/// Copy a float tensor to the host as `f32`
fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CropDiseaseError::Training(format!("Failed to read tensor: {:?}", e)))
}

/// Fetch the items at `indices`, skipping those that fail to load
fn fetch_items(dataset: &StoreImageDataset, indices: &[usize]) -> Vec<LeafItem> {
    indices.iter().filter_map(|&i| dataset.get(i)).collect()
}

/// What the per-phase callbacks decided at the end of an epoch
#[derive(Debug, Clone, Copy, PartialEq)]
struct EpochOutcome {
    /// Learning rate for the next epoch
    next_lr: f64,
    /// Stop the phase now
    stop: bool,
}

/// Early stopping and plateau state of a single phase
///
/// Keeps a copy of the model from the epoch with the lowest `val_loss` so
/// that early stopping can restore it.
struct PhaseCallbacks<B: Backend> {
    stopper: EarlyStopping,
    plateau: ReduceLrOnPlateau,
    best: Option<(usize, PlantClassifier<B>)>,
}

impl<B: Backend> PhaseCallbacks<B> {
    fn new(config: &TrainingConfig) -> Self {
        Self {
            stopper: EarlyStopping::new(config.early_stopping_patience),
            plateau: ReduceLrOnPlateau::new(
                config.plateau_factor,
                config.plateau_patience,
                config.min_learning_rate,
            ),
            best: None,
        }
    }

    fn on_epoch_end(&mut self, epoch: usize, val_loss: f64, lr: f64, model: &PlantClassifier<B>) -> EpochOutcome {
        let next_lr = self.plateau.step(val_loss, lr);
        let decision = self.stopper.on_epoch_end(epoch, val_loss);
        if decision.improved {
            self.best = Some((epoch, model.clone()));
        }

        EpochOutcome {
            next_lr,
            stop: decision.stop,
        }
    }

    /// Epoch and weights with the lowest `val_loss` so far
    fn take_best(&mut self) -> Option<(usize, PlantClassifier<B>)> {
        self.best.take()
    }
}

/// Runs both training phases over object-store datasets
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    num_classes: usize,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, num_classes: usize, device: B::Device) -> Self {
        Self {
            config,
            device,
            num_classes,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train through both phases, returning the final model and the epoch history
    pub fn fit(
        &self,
        mut model: PlantClassifier<B>,
        train: &StoreImageDataset,
        val: &StoreImageDataset,
        checkpoints: &OutputLocation,
        log: &mut CsvLogger,
    ) -> Result<(PlantClassifier<B>, Vec<EpochRecord>)> {
        if train.is_empty() {
            return Err(CropDiseaseError::Training("Training dataset is empty".to_string()));
        }
        if self.config.batch_size == 0 {
            return Err(CropDiseaseError::Config("batch_size must be at least 1".to_string()));
        }

        let (frozen_epochs, fine_tune_epochs) = self.config.phase_epochs();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut history = Vec::new();
        // The best val_accuracy carries over into fine-tuning
        let mut saver = CheckpointSaver::new(checkpoints.local());

        let phases = [
            (Phase::FrozenBackbone, frozen_epochs, self.config.learning_rate),
            (Phase::FineTune, fine_tune_epochs, self.config.fine_tune_learning_rate()),
        ];

        for (phase, epochs, learning_rate) in phases {
            if epochs == 0 {
                info!("Skipping phase {} ({}): no epochs", phase.number(), phase.description());
                continue;
            }

            info!(
                "Phase {}: {} for {} epochs (lr {:.2e})",
                phase.number(),
                phase.description(),
                epochs,
                learning_rate
            );

            model = self.run_phase(
                phase,
                model,
                epochs,
                learning_rate,
                train,
                val,
                &mut rng,
                &mut saver,
                checkpoints,
                log,
                &mut history,
            )?;
        }

        Ok((model, history))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phase(
        &self,
        phase: Phase,
        mut model: PlantClassifier<B>,
        epochs: usize,
        learning_rate: f64,
        train: &StoreImageDataset,
        val: &StoreImageDataset,
        rng: &mut ChaCha8Rng,
        saver: &mut CheckpointSaver,
        checkpoints: &OutputLocation,
        log: &mut CsvLogger,
        history: &mut Vec<EpochRecord>,
    ) -> Result<PlantClassifier<B>> {
        let mut optimizer = AdamConfig::new().init::<B, PlantClassifier<B>>();
        let batcher = LeafBatcher::training(
            self.config.image_size,
            self.num_classes,
            self.config.seed.wrapping_add(phase.number() as u64),
        );

        let mut callbacks = PhaseCallbacks::<B>::new(&self.config);
        let mut lr = learning_rate;

        for epoch in 1..=epochs {
            let started = std::time::Instant::now();
            let (trained, train_metrics) =
                self.train_epoch(phase, model, &mut optimizer, lr, train, &batcher, rng)?;
            model = trained;

            let val_metrics = self.evaluate(&model, val)?;

            let record = EpochRecord {
                phase: phase.number(),
                epoch,
                loss: train_metrics.loss(),
                accuracy: train_metrics.accuracy(),
                val_loss: val_metrics.loss,
                val_accuracy: val_metrics.accuracy,
                val_top_3_accuracy: val_metrics.top_3_accuracy,
                lr,
            };

            info!(
                "Phase {} epoch {}/{}: loss {:.4}, acc {:.2}% | val_loss {:.4}, val_acc {:.2}%, val_top{} {:.2}% ({})",
                phase.number(),
                epoch,
                epochs,
                record.loss,
                100.0 * record.accuracy,
                record.val_loss,
                100.0 * record.val_accuracy,
                self.config.top_k,
                100.0 * record.val_top_3_accuracy,
                format_duration(started.elapsed().as_secs_f64())
            );

            log.log(&record)?;
            history.push(record);

            if let Some(path) = saver.on_epoch_end(epoch, val_metrics.accuracy) {
                model.save(&path)?;
                info!("Saved checkpoint {:?}", path);
                checkpoints.publish_file(&path)?;
            }

            let outcome = callbacks.on_epoch_end(epoch, val_metrics.loss, lr, &model);
            lr = outcome.next_lr;
            if outcome.stop {
                if let Some((best_epoch, best)) = callbacks.take_best() {
                    info!("Restoring weights from epoch {}", best_epoch);
                    model = best;
                }
                break;
            }
        }

        Ok(model)
    }

    #[allow(clippy::too_many_arguments)]
    fn train_epoch<O>(
        &self,
        phase: Phase,
        mut model: PlantClassifier<B>,
        optimizer: &mut O,
        lr: f64,
        dataset: &StoreImageDataset,
        batcher: &LeafBatcher,
        rng: &mut ChaCha8Rng,
    ) -> Result<(PlantClassifier<B>, MetricAccumulator)>
    where
        O: Optimizer<PlantClassifier<B>, B>,
    {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(rng);

        let batch_size = self.config.batch_size;
        let num_batches = indices.len().div_ceil(batch_size);
        let mut metrics = MetricAccumulator::new(self.config.top_k);

        for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
            let items = fetch_items(dataset, chunk);
            if items.is_empty() {
                continue;
            }

            let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
            let batch: LeafBatch<B> = batcher.batch(items, &self.device);

            let logits = match phase {
                Phase::FrozenBackbone => model.forward_frozen_backbone(batch.images),
                Phase::FineTune => model.forward(batch.images),
            };

            let loss = categorical_cross_entropy(logits.clone(), batch.targets);
            let loss_value: f64 = loss.clone().into_scalar().elem();
            let scores = to_host(logits.detach())?;
            metrics.update(loss_value, &scores, self.num_classes, &labels);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);

            if (batch_idx + 1) % LOG_EVERY_BATCHES == 0 || batch_idx + 1 == num_batches {
                info!(
                    "  Batch {:>4}/{}: loss = {:.4}, acc = {:.2}%",
                    batch_idx + 1,
                    num_batches,
                    loss_value,
                    100.0 * metrics.accuracy()
                );
            }
        }

        if metrics.samples() == 0 {
            return Err(CropDiseaseError::Training(
                "No training image could be loaded this epoch".to_string(),
            ));
        }

        Ok((model, metrics))
    }

    /// Loss, accuracy and top-k accuracy over `dataset`, without augmentation or dropout
    pub fn evaluate(&self, model: &PlantClassifier<B>, dataset: &StoreImageDataset) -> Result<EvalMetrics> {
        let model = model.valid();
        let batcher = LeafBatcher::validation(self.config.image_size, self.num_classes);
        let indices: Vec<usize> = (0..dataset.len()).collect();
        let mut metrics = MetricAccumulator::new(self.config.top_k);

        for chunk in indices.chunks(self.config.batch_size.max(1)) {
            let items = fetch_items(dataset, chunk);
            if items.is_empty() {
                continue;
            }

            let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
            let batch: LeafBatch<B::InnerBackend> = batcher.batch(items, &self.device);

            let logits = model.forward(batch.images);
            let loss: f64 = categorical_cross_entropy(logits.clone(), batch.targets)
                .into_scalar()
                .elem();
            let scores = to_host(logits)?;
            metrics.update(loss, &scores, self.num_classes, &labels);
        }

        if metrics.samples() == 0 {
            warn!("No validation image could be loaded; metrics are zero");
        }

        Ok(metrics.finish())
    }
}

/// Write the model record, its configuration, the label list and the metrics to `dir`
pub fn save_artifacts<B: Backend>(
    model: &PlantClassifier<B>,
    model_config: &PlantClassifierConfig,
    class_names: &[&str],
    metrics: &EvalMetrics,
    dir: &Path,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    model.save(&dir.join(format!("{}.mpk", MODEL_FILE_STEM)))?;
    model_config.save(dir.join(MODEL_CONFIG_FILE))?;
    fs::write(dir.join(CLASS_NAMES_FILE), serde_json::to_string_pretty(class_names)?)?;
    fs::write(dir.join(METRICS_FILE), serde_json::to_string_pretty(metrics)?)?;

    info!("Saved model artifacts to {:?}", dir);
    Ok(())
}

/// Everything a training run needs besides the store and device
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    /// Training images: key prefix or `gs://` URI
    pub train_prefix: String,
    /// Validation images: key prefix or `gs://` URI
    pub val_prefix: String,
    /// Model output directory: local path or `gs://` URI
    pub model_dir: String,
    /// Checkpoint directory: local path or `gs://` URI
    pub checkpoint_dir: String,
    /// Optional `Backbone` record to start from
    pub backbone_weights: Option<PathBuf>,
    pub config: TrainingConfig,
    pub model_config: PlantClassifierConfig,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            train_prefix: format!("{}/train", DATASET_PREFIX),
            val_prefix: format!("{}/val", DATASET_PREFIX),
            model_dir: super::DEFAULT_MODEL_DIR.to_string(),
            checkpoint_dir: super::DEFAULT_CHECKPOINT_DIR.to_string(),
            backbone_weights: None,
            config: TrainingConfig::new(),
            model_config: PlantClassifierConfig::new(),
        }
    }
}

/// Outcome of a training run
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// Final validation metrics
    pub metrics: EvalMetrics,
    pub history: Vec<EpochRecord>,
    /// Local directory holding the artifacts
    pub model_dir: PathBuf,
    /// Keys uploaded when the model directory is remote
    pub uploaded: Vec<String>,
}

/// Load the datasets, train, evaluate, and persist every artifact
pub fn run_training<B: AutodiffBackend>(
    options: &TrainingOptions,
    store: Arc<dyn ObjectStore>,
    device: B::Device,
) -> Result<TrainingSummary> {
    let config = options.config.clone();
    let model_config = options
        .model_config
        .clone()
        .with_num_classes(CLASS_NAMES.len())
        .with_input_size(config.image_size);

    let (train_store, train_prefix) = resolve_dataset(&options.train_prefix, &store)?;
    let (val_store, val_prefix) = resolve_dataset(&options.val_prefix, &store)?;

    info!("Loading training data from {}", train_store.uri(&train_prefix));
    let train = StoreImageDataset::from_prefix(train_store, &train_prefix, &CLASS_NAMES)?;
    info!("Loading validation data from {}", val_store.uri(&val_prefix));
    let val = StoreImageDataset::from_prefix(val_store, &val_prefix, &CLASS_NAMES)?;

    info!("  Training samples:   {}", train.len());
    info!("  Validation samples: {}", val.len());

    let model_out = OutputLocation::resolve(&options.model_dir, &store, "model")?;
    let checkpoints = OutputLocation::resolve(&options.checkpoint_dir, &store, "checkpoints")?;

    let mut model = PlantClassifier::<B>::new(&model_config, &device);
    if let Some(weights) = &options.backbone_weights {
        info!("Initializing backbone from {:?}", weights);
        model = model.with_backbone_weights(weights, &device)?;
    }

    let mut log = CsvLogger::create(model_out.local().join(TRAINING_LOG_FILE))?;
    let trainer = Trainer::<B>::new(config, model_config.num_classes, device);

    let started = std::time::Instant::now();
    let (model, history) = trainer.fit(model, &train, &val, &checkpoints, &mut log)?;
    info!(
        "Training finished in {}",
        format_duration(started.elapsed().as_secs_f64())
    );

    let metrics = trainer.evaluate(&model, &val)?;
    info!(
        "Validation: loss {:.4}, accuracy {:.2}%, top-{} accuracy {:.2}%",
        metrics.loss,
        100.0 * metrics.accuracy,
        trainer.config().top_k,
        100.0 * metrics.top_3_accuracy
    );

    save_artifacts(&model, &model_config, &CLASS_NAMES, &metrics, model_out.local())?;
    let uploaded = model_out.publish_all()?;

    Ok(TrainingSummary {
        metrics,
        history,
        model_dir: model_out.local().to_path_buf(),
        uploaded,
    })
}
