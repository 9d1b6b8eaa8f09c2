//! Dataset Module
//!
//! PlantVillage class list, dataset download, object-store upload pipeline,
//! augmentation, and the Burn `Dataset`/`Batcher` used by training.

pub mod augmentation;
pub mod burn_dataset;
pub mod prepare;
pub mod source;

use std::path::Path;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{LeafBatch, LeafBatcher, LeafItem, StoreImageDataset};
pub use prepare::{DatasetPreparer, PrepareConfig, PrepareSummary, Split};
pub use source::{DatasetSource, KaggleCredentials};

/// Object-store prefix the dataset is uploaded under
pub const DATASET_PREFIX: &str = "datasets/plantvillage";

/// Default public dataset handle (`owner/name`)
pub const DEFAULT_DATASET: &str = "abdallahalidev/plantvillage-dataset";

/// Image file extensions accepted by every pipeline
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// The 38 PlantVillage classes, in model output order
pub const CLASS_NAMES: [&str; 38] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
    "Blueberry___healthy",
    "Cherry_(including_sour)___Powdery_mildew",
    "Cherry_(including_sour)___healthy",
    "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
    "Corn_(maize)___Common_rust_",
    "Corn_(maize)___Northern_Leaf_Blight",
    "Corn_(maize)___healthy",
    "Grape___Black_rot",
    "Grape___Esca_(Black_Measles)",
    "Grape___Leaf_blight_(Isariopsis_Leaf_Spot)",
    "Grape___healthy",
    "Orange___Haunglongbing_(Citrus_greening)",
    "Peach___Bacterial_spot",
    "Peach___healthy",
    "Pepper,_bell___Bacterial_spot",
    "Pepper,_bell___healthy",
    "Potato___Early_blight",
    "Potato___Late_blight",
    "Potato___healthy",
    "Raspberry___healthy",
    "Soybean___healthy",
    "Squash___Powdery_mildew",
    "Strawberry___Leaf_scorch",
    "Strawberry___healthy",
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
    "Tomato___Septoria_leaf_spot",
    "Tomato___Spider_mites Two-spotted_spider_mite",
    "Tomato___Target_Spot",
    "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    "Tomato___Tomato_mosaic_virus",
    "Tomato___healthy",
];

/// Label set used by the serving path when no `class_names.json` is available
pub const FALLBACK_LABELS: [&str; 5] = [
    "Tomato___Late_blight",
    "Corn___Common_rust",
    "Potato___Early_blight",
    "Apple___Apple_scab",
    "Grape___Black_rot",
];

/// Number of PlantVillage classes
pub fn num_classes() -> usize {
    CLASS_NAMES.len()
}

/// Index of a class directory name in [`CLASS_NAMES`]
pub fn class_index(name: &str) -> Option<usize> {
    CLASS_NAMES.iter().position(|c| *c == name)
}

/// Whether a path has one of the accepted image extensions (case-insensitive)
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Whether an object key names an image file
pub fn is_image_key(key: &str) -> bool {
    is_image_file(Path::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names() {
        assert_eq!(num_classes(), 38);
        assert_eq!(class_index("Apple___Apple_scab"), Some(0));
        assert_eq!(class_index("Tomato___healthy"), Some(37));
        assert_eq!(class_index("Banana___healthy"), None);
    }

    #[test]
    fn test_class_names_unique() {
        let mut names = CLASS_NAMES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CLASS_NAMES.len());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("leaf.jpg")));
        assert!(is_image_file(Path::new("leaf.JPEG")));
        assert!(is_image_file(Path::new("dir/leaf.Png")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }
}
