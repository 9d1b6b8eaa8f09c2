//! CNN Model Architecture for Crop Disease Classification
//!
//! The classifier is split into a convolutional `Backbone` (feature
//! extractor, loadable from a pre-trained record) and a `ClassifierHead`
//! trained on top of it. Training first fits the head with the backbone
//! frozen, then fine-tunes both.

use std::path::Path;

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, backend::Backend, Tensor},
};

use crate::utils::error;

/// Configuration for the PlantClassifier model
#[derive(Config, Debug)]
pub struct PlantClassifierConfig {
    /// Number of output classes (default: 38 for PlantVillage)
    #[config(default = "38")]
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub input_size: usize,

    /// Dropout rate applied before each dense layer of the head
    #[config(default = "0.3")]
    pub dropout_rate: f64,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters in the first backbone block; doubled in every following block
    #[config(default = "32")]
    pub base_filters: usize,

    /// Width of the hidden dense layer in the head
    #[config(default = "512")]
    pub hidden_units: usize,
}

impl PlantClassifierConfig {
    /// Number of channels the backbone emits
    pub fn feature_channels(&self) -> usize {
        self.base_filters * 16
    }
}

/// A CNN block with Conv2d, BatchNorm, ReLU, and optional MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, with_pool: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Convolutional feature extractor
///
/// Five blocks: `base -> 2x -> 4x -> 8x -> 16x` filters, each halving the
/// spatial size (224 -> 7).
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> Backbone<B> {
    pub fn new(config: &PlantClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;
        let widths = [base, base * 2, base * 4, base * 8, base * 16];

        let mut blocks = Vec::with_capacity(widths.len());
        let mut in_channels = config.in_channels;
        for out_channels in widths {
            blocks.push(ConvBlock::new(in_channels, out_channels, true, device));
            in_channels = out_channels;
        }

        Self { blocks }
    }

    /// Feature maps `[batch, feature_channels, H/32, W/32]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Trainable classification head
///
/// Global average pool -> batch norm -> dropout -> dense (ReLU) -> batch norm
/// -> dropout -> dense
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub global_pool: AdaptiveAvgPool2d,
    pub bn1: BatchNorm<B>,
    pub dropout1: Dropout,
    pub fc1: Linear<B>,
    pub relu: Relu,
    pub bn2: BatchNorm<B>,
    pub dropout2: Dropout,
    pub fc2: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(config: &PlantClassifierConfig, device: &B::Device) -> Self {
        Self {
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            bn1: BatchNormConfig::new(config.feature_channels()).init(device),
            dropout1: DropoutConfig::new(config.dropout_rate).init(),
            fc1: LinearConfig::new(config.feature_channels(), config.hidden_units).init(device),
            relu: Relu::new(),
            bn2: BatchNormConfig::new(config.hidden_units).init(device),
            dropout2: DropoutConfig::new(config.dropout_rate).init(),
            fc2: LinearConfig::new(config.hidden_units, config.num_classes).init(device),
        }
    }

    /// Logits `[batch, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.bn1.forward(self.global_pool.forward(features));

        // [B, C, 1, 1] -> [B, C]
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout1.forward(x);
        let x = self.relu.forward(self.fc1.forward(x));

        // Batch norm runs over [B, hidden, 1, 1]
        let hidden = self.fc1.weight.dims()[1];
        let x = self
            .bn2
            .forward(x.reshape([batch_size, hidden, 1, 1]))
            .reshape([batch_size, hidden]);

        let x = self.dropout2.forward(x);
        self.fc2.forward(x)
    }
}

/// Crop disease classifier: backbone plus head
#[derive(Module, Debug)]
pub struct PlantClassifier<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> PlantClassifier<B> {
    pub fn new(config: &PlantClassifierConfig, device: &B::Device) -> Self {
        Self {
            backbone: Backbone::new(config, device),
            head: ClassifierHead::new(config, device),
        }
    }

    /// Forward pass, returning logits `[batch, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(x))
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.head.fc2.weight.dims()[1]
    }

    /// Replace the backbone weights with a saved `Backbone` record
    pub fn with_backbone_weights(mut self, path: &Path, device: &B::Device) -> error::Result<Self> {
        self.backbone = self
            .backbone
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)?;
        Ok(self)
    }

    /// Load a full classifier record
    pub fn load(config: &PlantClassifierConfig, path: &Path, device: &B::Device) -> error::Result<Self> {
        let model = Self::new(config, device).load_file(path.to_path_buf(), &CompactRecorder::new(), device)?;
        Ok(model)
    }

    /// Save the classifier record
    ///
    /// The recorder replaces any extension of `path` with `.mpk`.
    pub fn save(&self, path: &Path) -> error::Result<()> {
        self.clone()
            .save_file(path.to_path_buf(), &CompactRecorder::new())?;
        Ok(())
    }
}

impl<B: AutodiffBackend> PlantClassifier<B> {
    /// Forward pass that keeps the backbone out of the autodiff graph
    ///
    /// The backbone runs on the inner backend in evaluation mode, so
    /// neither its weights nor its batch-norm statistics change.
    pub fn forward_frozen_backbone(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.valid().forward(x.inner());
        self.head.forward(Tensor::from_inner(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DefaultBackend, TrainingBackend};
    use burn::optim::GradientsParams;
    use tempfile::TempDir;

    type TestBackend = DefaultBackend;

    fn small_config() -> PlantClassifierConfig {
        PlantClassifierConfig::new()
            .with_num_classes(5)
            .with_input_size(32)
            .with_base_filters(2)
            .with_hidden_units(8)
    }

    #[test]
    fn test_default_config() {
        let config = PlantClassifierConfig::new();
        assert_eq!(config.num_classes, 38);
        assert_eq!(config.input_size, 224);
        assert_eq!(config.hidden_units, 512);
        assert_eq!(config.dropout_rate, 0.3);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model_config.json");
        small_config().save(&path).unwrap();

        let loaded = PlantClassifierConfig::load(&path).unwrap();
        assert_eq!(loaded.num_classes, 5);
        assert_eq!(loaded.input_size, 32);
        assert_eq!(loaded.hidden_units, 8);
        assert_eq!(loaded.feature_channels(), 32);
    }

    #[test]
    fn test_head_batch_norm_widths() {
        let device = Default::default();
        let model = PlantClassifier::<TrainingBackend>::new(&small_config(), &device);

        assert_eq!(model.head.bn1.gamma.dims(), [32]);
        assert_eq!(model.head.bn2.gamma.dims(), [8]);

        // Training mode keeps batch statistics over [B, C, 1, 1]
        let input = Tensor::<TrainingBackend, 4>::ones([3, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [3, 5]);
    }

    #[test]
    fn test_plant_classifier_output_shape() {
        let device = Default::default();
        let model = PlantClassifier::<TestBackend>::new(&small_config(), &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5]);
        assert_eq!(model.num_classes(), 5);
    }

    #[test]
    fn test_forward_softmax_sums_to_one() {
        let device = Default::default();
        let model = PlantClassifier::<TestBackend>::new(&small_config(), &device);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let probs = model.forward_softmax(input).into_data().to_vec::<f32>().unwrap();

        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_frozen_backbone_receives_no_gradients() {
        let device = Default::default();
        let model = PlantClassifier::<TrainingBackend>::new(&small_config(), &device);

        let input = Tensor::<TrainingBackend, 4>::ones([2, 3, 32, 32], &device);
        let loss = model.forward_frozen_backbone(input).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);

        let conv_weight = &model.backbone.blocks[0].conv.weight;
        let fc_weight = &model.head.fc2.weight;
        assert!(grads.get::<DefaultBackend, 4>(conv_weight.id).is_none());
        assert!(grads.get::<DefaultBackend, 2>(fc_weight.id).is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config();
        let model = PlantClassifier::<TestBackend>::new(&config, &device);

        let path = dir.path().join("model.mpk");
        model.save(&path).unwrap();
        assert!(dir.path().join("model.mpk").exists());

        let loaded = PlantClassifier::<TestBackend>::load(&config, &path, &device).unwrap();
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let a = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let b = loaded.forward(input).into_data().to_vec::<f32>().unwrap();
        // Records are stored at half precision
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 5e-2);
        }
    }
}
