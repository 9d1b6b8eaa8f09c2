//! Data Augmentation Module for Leaf Images
//!
//! Randomized photometric and geometric transforms applied to training
//! images after resizing:
//!
//! - horizontal flip (p = 0.5)
//! - brightness shift in `[-0.2, 0.2]`
//! - contrast factor in `[0.8, 1.2]`
//! - saturation factor in `[0.8, 1.2]`
//! - rotation by a random multiple of 90°
//!
//! Validation images are only resized and normalized.

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Configuration for data augmentation
#[derive(Clone, Debug)]
pub struct AugmentationConfig {
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f32,
    /// Brightness shift range (±brightness_delta, in [0, 1] pixel units)
    pub brightness_delta: f32,
    /// Contrast factor range
    pub contrast_range: (f32, f32),
    /// Saturation factor range
    pub saturation_range: (f32, f32),
    /// Rotate by a random multiple of 90°
    pub rot90: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            brightness_delta: 0.2,
            contrast_range: (0.8, 1.2),
            saturation_range: (0.8, 1.2),
            rot90: true,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations (for validation/inference)
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            brightness_delta: 0.0,
            contrast_range: (1.0, 1.0),
            saturation_range: (1.0, 1.0),
            rot90: false,
        }
    }

    /// Whether any transform can change an image
    pub fn is_enabled(&self) -> bool {
        self.horizontal_flip_prob > 0.0
            || self.brightness_delta > 0.0
            || self.contrast_range != (1.0, 1.0)
            || self.saturation_range != (1.0, 1.0)
            || self.rot90
    }
}

fn sample_range(rng: &mut ChaCha8Rng, (low, high): (f32, f32)) -> f32 {
    if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    /// Augmenter with the training transforms
    pub fn with_defaults(image_size: u32) -> Self {
        Self::new(AugmentationConfig::default(), image_size)
    }

    /// Augmenter that only resizes and normalizes
    pub fn no_augmentation(image_size: u32) -> Self {
        Self::new(AugmentationConfig::none(), image_size)
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Apply the configured transforms to an already resized image
    pub fn augment(&self, img: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut result = img;

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            result = image::imageops::flip_horizontal(&result);
        }

        if self.config.brightness_delta > 0.0 {
            let delta = rng.gen_range(-self.config.brightness_delta..=self.config.brightness_delta);
            result = adjust_brightness(&result, delta);
        }

        if self.config.contrast_range != (1.0, 1.0) {
            let factor = sample_range(rng, self.config.contrast_range);
            result = adjust_contrast(&result, factor);
        }

        if self.config.saturation_range != (1.0, 1.0) {
            let factor = sample_range(rng, self.config.saturation_range);
            result = adjust_saturation(&result, factor);
        }

        if self.config.rot90 {
            result = rotate90_times(&result, rng.gen_range(0..4));
        }

        result
    }

    /// Resize to the model input size, ignoring aspect ratio
    pub fn resize(&self, img: &DynamicImage) -> RgbImage {
        img.resize_exact(self.image_size, self.image_size, FilterType::Triangle)
            .to_rgb8()
    }

    /// Full preprocessing: resize, augment (when an RNG is given), CHW floats in [0, 1]
    pub fn preprocess(&self, img: &DynamicImage, rng: Option<&mut ChaCha8Rng>) -> Vec<f32> {
        let mut result = self.resize(img);

        if let Some(rng) = rng {
            result = self.augment(result, rng);
        }

        to_chw(&result)
    }
}

/// Convert an RGB image to CHW float data normalized to [0, 1]
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }

    data
}

/// Shift every channel by `delta` (fraction of full scale)
fn adjust_brightness(img: &RgbImage, delta: f32) -> RgbImage {
    let shift = delta * 255.0;
    map_pixels(img, |p| {
        Rgb([
            (p[0] as f32 + shift).clamp(0.0, 255.0) as u8,
            (p[1] as f32 + shift).clamp(0.0, 255.0) as u8,
            (p[2] as f32 + shift).clamp(0.0, 255.0) as u8,
        ])
    })
}

/// Scale each channel around its own mean
fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() as f64 * img.height() as f64).max(1.0);
    let mut sums = [0.0f64; 3];
    for pixel in img.pixels() {
        for c in 0..3 {
            sums[c] += pixel[c] as f64;
        }
    }
    let means = sums.map(|s| (s / count) as f32);

    map_pixels(img, |p| {
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (means[c] + factor * (p[c] as f32 - means[c])).clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Blend between grayscale and the original color
fn adjust_saturation(img: &RgbImage, factor: f32) -> RgbImage {
    map_pixels(img, |p| {
        let gray = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (gray + factor * (p[c] as f32 - gray)).clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Rotate counter-clockwise by `k` quarter turns
fn rotate90_times(img: &RgbImage, k: u32) -> RgbImage {
    match k % 4 {
        1 => image::imageops::rotate270(img),
        2 => image::imageops::rotate180(img),
        3 => image::imageops::rotate90(img),
        _ => img.clone(),
    }
}

fn map_pixels<F: Fn(&Rgb<u8>) -> Rgb<u8>>(img: &RgbImage, f: F) -> RgbImage {
    let (width, height) = img.dimensions();
    let mut output = ImageBuffer::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels() {
        output.put_pixel(x, y, f(pixel));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image() -> RgbImage {
        let mut img = ImageBuffer::new(64, 64);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 4) as u8, (y * 4) as u8, 128]);
        }
        img
    }

    #[test]
    fn test_default_config() {
        let config = AugmentationConfig::default();
        assert_eq!(config.horizontal_flip_prob, 0.5);
        assert_eq!(config.contrast_range, (0.8, 1.2));
        assert!(config.is_enabled());
        assert!(!AugmentationConfig::none().is_enabled());
    }

    #[test]
    fn test_augment_keeps_dimensions() {
        let aug = Augmenter::with_defaults(64);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..8 {
            let result = aug.augment(create_test_image(), &mut rng);
            assert_eq!(result.dimensions(), (64, 64));
        }
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let aug = Augmenter::with_defaults(32);
        let img = DynamicImage::ImageRgb8(create_test_image());
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let data = aug.preprocess(&img, Some(&mut rng));
        assert_eq!(data.len(), 3 * 32 * 32);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_no_augmentation_is_deterministic() {
        let aug = Augmenter::no_augmentation(16);
        let img = DynamicImage::ImageRgb8(create_test_image());
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(2);

        assert_eq!(
            aug.preprocess(&img, Some(&mut rng_a)),
            aug.preprocess(&img, Some(&mut rng_b))
        );
    }

    #[test]
    fn test_to_chw_layout() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));

        let data = to_chw(&img);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_brightness_adjustment() {
        let img = create_test_image();
        let brighter = adjust_brightness(&img, 0.2);
        let darker = adjust_brightness(&img, -0.2);

        let orig = img.get_pixel(32, 32)[2];
        assert!(brighter.get_pixel(32, 32)[2] > orig);
        assert!(darker.get_pixel(32, 32)[2] < orig);
    }

    #[test]
    fn test_contrast_identity() {
        let img = create_test_image();
        let same = adjust_contrast(&img, 1.0);
        // Truncation to u8 may lose at most one level
        for (a, b) in img.pixels().zip(same.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_full_rotation_is_identity() {
        let img = create_test_image();
        let once = rotate90_times(&img, 1);
        assert_ne!(once, img);

        let back = rotate90_times(&rotate90_times(&once, 1), 2);
        assert_eq!(back, img);
    }
}
