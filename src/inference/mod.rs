//! Inference module for serving predictions
//!
//! This module provides:
//! - Request preprocessing (base64 -> `[1, 3, 224, 224]` tensor)
//! - The `Predictor` capability with model-backed and random implementations
//! - The disease-care lookup table
//! - Cold-start bootstrap from object storage
//! - `InferenceService`, the entry point used by the HTTP server

pub mod bootstrap;
pub mod disease;
pub mod predictor;
pub mod preprocess;
pub mod service;

// Re-export main types for convenience
pub use bootstrap::{bootstrap, bootstrap_with_store, fallback_labels, load_labels, BootstrapConfig};
pub use disease::{disease_key, DiseaseInfo, DiseaseRecord, DiseaseTable};
pub use predictor::{BurnPredictor, Prediction, Predictor, RandomPredictor, UNKNOWN_LABEL};
pub use preprocess::{decode_base64_image, image_to_tensor};
pub use service::{InferenceService, PredictionResponse};
