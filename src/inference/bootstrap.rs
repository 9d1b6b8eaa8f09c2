//! Serving cold start
//!
//! Downloads the model artifact and label list from object storage and
//! builds an [`InferenceService`]. Nothing here aborts startup: any failure
//! is logged and the service falls back to the fallback labels or to
//! random predictions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::prelude::*;
use tracing::{info, warn};

use super::disease::DiseaseTable;
use super::predictor::{BurnPredictor, Predictor, RandomPredictor};
use super::service::InferenceService;
use crate::dataset::FALLBACK_LABELS;
use crate::model::{PlantClassifier, PlantClassifierConfig, MODEL_CONFIG_FILE, MODEL_FILE_STEM};
use crate::storage::{download_prefix, join_key, open_store, ObjectStore, StoreConfig};
use crate::training::CLASS_NAMES_FILE;
use crate::utils::error::{CropDiseaseError, Result};
use crate::MODEL_PREFIX;

/// Where to find the model and where to cache it
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Object-store prefix of the model artifact
    pub model_prefix: String,
    /// Local directory the artifact is downloaded into
    pub cache_dir: PathBuf,
    /// Seed for the random fallback predictor
    pub random_seed: Option<u64>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            model_prefix: MODEL_PREFIX.to_string(),
            cache_dir: std::env::temp_dir().join("crop_disease_model"),
            random_seed: None,
        }
    }
}

/// The five-label fallback list
pub fn fallback_labels() -> Vec<String> {
    FALLBACK_LABELS.iter().map(|s| s.to_string()).collect()
}

/// Parse a JSON label list, rejecting an empty one
pub fn parse_labels(bytes: &[u8]) -> Result<Vec<String>> {
    let labels: Vec<String> = serde_json::from_slice(bytes)?;
    if labels.is_empty() {
        return Err(CropDiseaseError::InvalidInput("label list is empty".to_string()));
    }
    Ok(labels)
}

/// Fetch `<prefix>/class_names.json`, substituting the fallback list on any failure
pub fn load_labels(store: &dyn ObjectStore, prefix: &str) -> Vec<String> {
    let key = join_key(prefix, CLASS_NAMES_FILE);

    match store.get(&key).and_then(|bytes| parse_labels(&bytes)) {
        Ok(labels) => {
            info!("Loaded {} class names from {}", labels.len(), store.uri(&key));
            labels
        }
        Err(e) => {
            warn!("Could not load class names from {}: {}", store.uri(&key), e);
            warn!("Using {} fallback class names", FALLBACK_LABELS.len());
            fallback_labels()
        }
    }
}

/// Load a classifier from a local artifact directory
///
/// The architecture comes from `model_config.json` when present, otherwise
/// from the default configuration.
pub fn load_model_dir<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(PlantClassifier<B>, PlantClassifierConfig)> {
    let config_path = dir.join(MODEL_CONFIG_FILE);
    let config = if config_path.exists() {
        PlantClassifierConfig::load(&config_path)
            .map_err(|e| CropDiseaseError::Config(format!("{:?}: {:?}", config_path, e)))?
    } else {
        warn!("{:?} not found, assuming the default architecture", config_path);
        PlantClassifierConfig::new()
    };

    let weights = dir.join(format!("{}.mpk", MODEL_FILE_STEM));
    if !weights.exists() {
        return Err(CropDiseaseError::PathNotFound(weights));
    }

    let model = PlantClassifier::load(&config, &weights, device)?;
    Ok((model, config))
}

/// Download the artifact under `config.model_prefix` and wrap it in a predictor
pub fn load_predictor<B: Backend>(
    store: &dyn ObjectStore,
    config: &BootstrapConfig,
    labels: Vec<String>,
    device: B::Device,
) -> Result<BurnPredictor<B>> {
    info!(
        "Downloading model from {} to {:?}",
        store.uri(&config.model_prefix),
        config.cache_dir
    );
    let files = download_prefix(store, &config.model_prefix, &config.cache_dir)?;
    info!("Downloaded {} model files", files.len());

    let (model, model_config) = load_model_dir::<B>(&config.cache_dir, &device)?;
    if model.num_classes() != labels.len() {
        warn!(
            "Model has {} outputs but {} labels were loaded",
            model.num_classes(),
            labels.len()
        );
    }

    Ok(BurnPredictor::new(model, labels, model_config.input_size, device))
}

/// Build the service from an already opened store
pub fn bootstrap_with_store<B: Backend>(
    store: &dyn ObjectStore,
    config: &BootstrapConfig,
    diseases: DiseaseTable,
    device: B::Device,
) -> InferenceService {
    let labels = load_labels(store, &config.model_prefix);

    let predictor: Arc<dyn Predictor> = match load_predictor::<B>(store, config, labels.clone(), device) {
        Ok(predictor) => {
            info!("Model loaded successfully");
            Arc::new(predictor)
        }
        Err(e) => {
            warn!("Model loading failed: {}", e);
            warn!("Using random predictions as fallback");
            Arc::new(RandomPredictor::new(labels, config.random_seed))
        }
    };

    InferenceService::new(predictor, diseases)
}

/// Open the store and build the service, degrading when the store is unreachable
pub fn bootstrap<B: Backend>(
    store_config: &StoreConfig,
    config: &BootstrapConfig,
    diseases: DiseaseTable,
    device: B::Device,
) -> InferenceService {
    match open_store(store_config) {
        Ok(store) => bootstrap_with_store::<B>(store.as_ref(), config, diseases, device),
        Err(e) => {
            warn!("Could not open object store: {}", e);
            warn!("Serving random predictions over the fallback labels");
            InferenceService::new(
                Arc::new(RandomPredictor::new(fallback_labels(), config.random_seed)),
                diseases,
            )
        }
    }
}
