//! Model module for the crop disease classifier
//!
//! The classifier is a convolutional backbone with a dense head, built on
//! Burn. Its configuration is saved next to the weights as
//! `model_config.json` so serving can rebuild the exact architecture.

pub mod cnn;

pub use cnn::{Backbone, ClassifierHead, PlantClassifier, PlantClassifierConfig};

/// File name of the saved weights, without the recorder extension
pub const MODEL_FILE_STEM: &str = "model";

/// File name of the saved classifier configuration
pub const MODEL_CONFIG_FILE: &str = "model_config.json";
