//! # Crop Disease Recognition
//!
//! A Rust library for the crop disease pipeline built on the Burn framework:
//! dataset preparation into object storage, two-phase classifier training,
//! pre-trained model deployment, and the inference service behind the HTTP
//! endpoint.
//!
//! ## Modules
//!
//! - `storage`: Object-store abstraction with Cloud Storage and local-directory backends
//! - `dataset`: Class list, dataset download and upload, augmentation, Burn dataset/batcher
//! - `model`: CNN classifier (backbone + head) built with Burn
//! - `training`: Two-phase training loop, callbacks and metrics
//! - `inference`: Preprocessing, predictors, disease lookup and cold-start bootstrap
//! - `deploy`: Packaging and upload of a pre-trained model
//! - `utils`: Error type, logging and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crop_disease::inference::{bootstrap, BootstrapConfig, DiseaseTable};
//! use crop_disease::storage::StoreConfig;
//!
//! let service = bootstrap::<crop_disease::backend::InferenceBackend>(
//!     &StoreConfig::default(),
//!     &BootstrapConfig::default(),
//!     DiseaseTable::embedded()?,
//!     Default::default(),
//! );
//! let response = service.diagnose(&image_base64)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod deploy;
pub mod inference;
pub mod model;
pub mod storage;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{LeafBatch, LeafBatcher, LeafItem, StoreImageDataset, CLASS_NAMES};
pub use inference::{InferenceService, PredictionResponse, Predictor};
pub use model::cnn::{PlantClassifier, PlantClassifierConfig};
pub use storage::{ObjectStore, StoreConfig};
pub use training::{TrainingConfig, TrainingOptions};
pub use utils::error::{CropDiseaseError, Result};

/// Side length of model input images
pub const IMAGE_SIZE: usize = 224;

/// Object-store prefix of the served model artifact
pub const MODEL_PREFIX: &str = "models/plant-disease-detector";
