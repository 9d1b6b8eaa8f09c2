//! Error Handling Module
//!
//! Defines the error type shared by the crop disease library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for crop disease pipeline operations
#[derive(Error, Debug)]
pub enum CropDiseaseError {
    /// Error decoding an in-memory image (a request payload or stored object)
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model operations
    #[error("Model error: {0}")]
    Model(String),

    /// Error talking to object storage
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested object does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for crop disease operations
pub type Result<T> = std::result::Result<T, CropDiseaseError>;

impl From<serde_json::Error> for CropDiseaseError {
    fn from(e: serde_json::Error) -> Self {
        CropDiseaseError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for CropDiseaseError {
    fn from(e: csv::Error) -> Self {
        CropDiseaseError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for CropDiseaseError {
    fn from(e: reqwest::Error) -> Self {
        CropDiseaseError::Http(e.to_string())
    }
}

impl From<image::ImageError> for CropDiseaseError {
    fn from(e: image::ImageError) -> Self {
        CropDiseaseError::ImageDecode(e.to_string())
    }
}

impl From<burn::record::RecorderError> for CropDiseaseError {
    fn from(e: burn::record::RecorderError) -> Self {
        CropDiseaseError::Model(format!("{:?}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CropDiseaseError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_path_not_found_display() {
        let err = CropDiseaseError::PathNotFound(PathBuf::from("/models/model.mpk"));
        assert!(format!("{}", err).contains("model.mpk"));
    }

    #[test]
    fn test_json_error_converts() {
        let parsed: std::result::Result<Vec<String>, _> = serde_json::from_str("{not json");
        let err: CropDiseaseError = parsed.unwrap_err().into();
        assert!(matches!(err, CropDiseaseError::Serialization(_)));
    }
}
