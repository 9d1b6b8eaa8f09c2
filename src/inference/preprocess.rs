//! Request image preprocessing
//!
//! Base64 payload -> decoded image -> `[1, 3, size, size]` tensor in [0, 1].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use burn::prelude::*;
use image::DynamicImage;

use crate::dataset::Augmenter;
use crate::utils::error::{CropDiseaseError, Result};

/// Decode a base64 image payload
///
/// A `data:<mime>;base64,` prefix is accepted and ignored, as is surrounding
/// whitespace.
pub fn decode_base64_image(payload: &str) -> Result<DynamicImage> {
    let payload = payload.trim();
    let encoded = match payload.split_once(";base64,") {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => payload,
    };

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CropDiseaseError::ImageDecode(format!("invalid base64: {}", e)))?;

    Ok(image::load_from_memory(&bytes)?)
}

/// Resize to `size`x`size` RGB and flatten to CHW floats in [0, 1]
pub fn image_to_input(image: &DynamicImage, size: usize) -> Vec<f32> {
    Augmenter::no_augmentation(size as u32).preprocess(image, None)
}

/// A single-image batch `[1, 3, size, size]`
pub fn image_to_tensor<B: Backend>(image: &DynamicImage, size: usize, device: &B::Device) -> Tensor<B, 4> {
    Tensor::<B, 4>::from_floats(
        TensorData::new(image_to_input(image, size), [1, 3, size, size]),
        device,
    )
}
