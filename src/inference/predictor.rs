//! Inference Predictor Module
//!
//! A [`Predictor`] turns one decoded image into a label and confidence.
//! [`BurnPredictor`] runs the trained classifier; [`RandomPredictor`] is the
//! degraded mode used when no model could be loaded.

use std::sync::Mutex;

use burn::prelude::*;
use image::DynamicImage;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::preprocess::image_to_tensor;
use crate::model::PlantClassifier;
use crate::utils::error::{CropDiseaseError, Result};

/// Label used when the model predicts an index outside the label set
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Confidence range of random predictions
pub const RANDOM_CONFIDENCE_RANGE: (f32, f32) = (0.75, 0.95);

/// Predicted label with its confidence in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Anything that can classify a leaf image
pub trait Predictor: Send + Sync {
    fn predict(&self, image: &DynamicImage) -> Result<Prediction>;

    /// Whether predictions come from a real model
    fn is_model_loaded(&self) -> bool;

    /// Label set, in model output order
    fn labels(&self) -> &[String];
}

/// Index and value of the largest score
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

/// Label of output `index`, or [`UNKNOWN_LABEL`] when out of range
pub fn label_for(labels: &[String], index: usize) -> String {
    labels
        .get(index)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

/// Predictor backed by a loaded classifier
///
/// Forward passes are serialized through a mutex.
pub struct BurnPredictor<B: Backend> {
    model: Mutex<PlantClassifier<B>>,
    device: B::Device,
    labels: Vec<String>,
    image_size: usize,
}

impl<B: Backend> BurnPredictor<B> {
    pub fn new(model: PlantClassifier<B>, labels: Vec<String>, image_size: usize, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            device,
            labels,
            image_size,
        }
    }

    /// Softmax scores `[num_classes]` for one image
    pub fn probabilities(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let input = image_to_tensor::<B>(image, self.image_size, &self.device);

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| CropDiseaseError::Inference("model lock poisoned".to_string()))?;
            model.forward_softmax(input)
        };

        output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| CropDiseaseError::Inference(format!("Failed to read model output: {:?}", e)))
    }
}

impl<B: Backend> Predictor for BurnPredictor<B> {
    fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        let probabilities = self.probabilities(image)?;
        let (index, confidence) = argmax(&probabilities)
            .ok_or_else(|| CropDiseaseError::Inference("model returned no scores".to_string()))?;

        debug!("Predicted class {} with confidence {:.4}", index, confidence);

        Ok(Prediction {
            label: label_for(&self.labels, index),
            confidence,
        })
    }

    fn is_model_loaded(&self) -> bool {
        true
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Fallback predictor: a random label with a random confidence
pub struct RandomPredictor {
    labels: Vec<String>,
    rng: Mutex<ChaCha8Rng>,
}

impl RandomPredictor {
    /// Seeded for reproducible output, or from OS entropy when `seed` is `None`
    pub fn new(labels: Vec<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            labels,
            rng: Mutex::new(rng),
        }
    }
}

impl Predictor for RandomPredictor {
    fn predict(&self, _image: &DynamicImage) -> Result<Prediction> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| CropDiseaseError::Inference("rng lock poisoned".to_string()))?;

        let label = self
            .labels
            .choose(&mut *rng)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        let (low, high) = RANDOM_CONFIDENCE_RANGE;
        let confidence = rng.gen_range(low..=high);

        Ok(Prediction { label, confidence })
    }

    fn is_model_loaded(&self) -> bool {
        false
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}
