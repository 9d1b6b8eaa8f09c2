//! Burn Dataset Integration for Object-Store Images
//!
//! `StoreImageDataset` lists image keys under a storage prefix and fetches
//! each image lazily on `get`. `LeafBatcher` resizes, optionally augments,
//! and stacks items into image tensors with one-hot targets.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::DynamicImage;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use super::augmentation::{AugmentationConfig, Augmenter};
use super::is_image_key;
use crate::storage::ObjectStore;
use crate::utils::error::{CropDiseaseError, Result};

/// A decoded image with its class index
#[derive(Clone)]
pub struct LeafItem {
    /// Decoded image, not yet resized
    pub image: DynamicImage,
    /// Class index
    pub label: usize,
    /// Object key the image came from
    pub key: String,
}

impl std::fmt::Debug for LeafItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafItem")
            .field("label", &self.label)
            .field("key", &self.key)
            .field(
                "image_size",
                &format!("{}x{}", self.image.width(), self.image.height()),
            )
            .finish()
    }
}

/// Class directory name of an image key (`.../<class>/<file>`)
pub fn label_from_key(key: &str) -> Option<&str> {
    let mut parts = key.rsplit('/');
    parts.next()?;
    parts.next().filter(|p| !p.is_empty())
}

/// Dataset of images stored under an object-store prefix
///
/// Images are fetched and decoded on demand; an object that cannot be
/// fetched or decoded yields `None` and is skipped by the trainer.
pub struct StoreImageDataset {
    store: Arc<dyn ObjectStore>,
    samples: Vec<(String, usize)>,
}

impl std::fmt::Debug for StoreImageDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreImageDataset")
            .field("bucket", &self.store.bucket())
            .field("len", &self.samples.len())
            .finish()
    }
}

impl StoreImageDataset {
    /// Build from an explicit list of `(key, label)` pairs
    pub fn new(store: Arc<dyn ObjectStore>, samples: Vec<(String, usize)>) -> Self {
        Self { store, samples }
    }

    /// List every image under `prefix`, labelled by its parent directory
    ///
    /// Directories whose name is not in `class_names` are skipped with a warning.
    pub fn from_prefix(store: Arc<dyn ObjectStore>, prefix: &str, class_names: &[&str]) -> Result<Self> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let mut samples = Vec::new();
        let mut unknown = BTreeSet::new();

        for object in store.list(&prefix)? {
            if !is_image_key(&object.key) {
                continue;
            }

            let Some(class_name) = label_from_key(&object.key) else {
                continue;
            };

            match class_names.iter().position(|c| *c == class_name) {
                Some(label) => samples.push((object.key, label)),
                None => {
                    unknown.insert(class_name.to_string());
                }
            }
        }

        for name in &unknown {
            warn!("Skipping images of unknown class '{}'", name);
        }

        if samples.is_empty() {
            return Err(CropDiseaseError::Dataset(format!(
                "No labelled images found under {}",
                store.uri(&prefix)
            )));
        }

        info!("Found {} images under {}", samples.len(), store.uri(&prefix));
        Ok(Self { store, samples })
    }

    /// `(key, label)` pairs in listing order
    pub fn samples(&self) -> &[(String, usize)] {
        &self.samples
    }

    /// Number of images per class index
    pub fn class_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for (_, label) in &self.samples {
            if *label < num_classes {
                counts[*label] += 1;
            }
        }
        counts
    }
}

impl Dataset<LeafItem> for StoreImageDataset {
    fn get(&self, index: usize) -> Option<LeafItem> {
        let (key, label) = self.samples.get(index)?;

        let bytes = match self.store.get(key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to fetch {}: {}", key, e);
                return None;
            }
        };

        match image::load_from_memory(&bytes) {
            Ok(image) => Some(LeafItem {
                image,
                label: *label,
                key: key.clone(),
            }),
            Err(e) => {
                warn!("Failed to decode {}: {}", key, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A stacked batch of images
#[derive(Clone, Debug)]
pub struct LeafBatch<B: Backend> {
    /// Images `[batch, 3, H, W]` in [0, 1]
    pub images: Tensor<B, 4>,
    /// One-hot targets `[batch, num_classes]`
    pub targets: Tensor<B, 2>,
    /// Class indices `[batch]`
    pub labels: Tensor<B, 1, Int>,
}

/// One-hot encode class indices into a row-major `[labels.len(), num_classes]` buffer
pub fn one_hot(labels: &[usize], num_classes: usize) -> Vec<f32> {
    let mut data = vec![0.0f32; labels.len() * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        if label < num_classes {
            data[row * num_classes + label] = 1.0;
        }
    }
    data
}

/// Batcher that resizes, optionally augments, and one-hot encodes
pub struct LeafBatcher {
    augmenter: Augmenter,
    augment: bool,
    num_classes: usize,
    image_size: usize,
    seed: u64,
    batches: AtomicU64,
}

impl std::fmt::Debug for LeafBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafBatcher")
            .field("image_size", &self.image_size)
            .field("num_classes", &self.num_classes)
            .field("augment", &self.augment)
            .finish()
    }
}

impl LeafBatcher {
    /// Batcher for training data (randomized augmentation)
    pub fn training(image_size: usize, num_classes: usize, seed: u64) -> Self {
        Self {
            augmenter: Augmenter::new(AugmentationConfig::default(), image_size as u32),
            augment: true,
            num_classes,
            image_size,
            seed,
            batches: AtomicU64::new(0),
        }
    }

    /// Batcher for validation data (resize and normalize only)
    pub fn validation(image_size: usize, num_classes: usize) -> Self {
        Self {
            augmenter: Augmenter::no_augmentation(image_size as u32),
            augment: false,
            num_classes,
            image_size,
            seed: 0,
            batches: AtomicU64::new(0),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> Batcher<B, LeafItem, LeafBatch<B>> for LeafBatcher {
    fn batch(&self, items: Vec<LeafItem>, device: &B::Device) -> LeafBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        // Each batch gets its own RNG stream
        let batch_index = self.batches.fetch_add(1, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(batch_index));

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut labels = Vec::with_capacity(batch_size);

        for item in &items {
            let rng = if self.augment { Some(&mut rng) } else { None };
            images_data.extend(self.augmenter.preprocess(&item.image, rng));
            labels.push(item.label);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let targets = Tensor::<B, 2>::from_floats(
            TensorData::new(one_hot(&labels, self.num_classes), [batch_size, self.num_classes]),
            device,
        );

        let labels_data: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels_data, [batch_size]), device);

        LeafBatch {
            images,
            targets,
            labels,
        }
    }
}
