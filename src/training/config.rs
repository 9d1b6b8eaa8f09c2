//! Training hyperparameters

use burn::config::Config;

/// Hyperparameters of a two-phase training run
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Total epochs across both phases
    #[config(default = "50")]
    pub epochs: usize,

    #[config(default = "32")]
    pub batch_size: usize,

    /// Learning rate of the frozen-backbone phase
    #[config(default = "0.001")]
    pub learning_rate: f64,

    /// Fine-tuning runs at `learning_rate / fine_tune_lr_divisor`
    #[config(default = "10.0")]
    pub fine_tune_lr_divisor: f64,

    /// Side length images are resized to
    #[config(default = "224")]
    pub image_size: usize,

    /// Epochs without `val_loss` improvement before stopping a phase
    #[config(default = "5")]
    pub early_stopping_patience: usize,

    /// Epochs without `val_loss` improvement before reducing the learning rate
    #[config(default = "3")]
    pub plateau_patience: usize,

    #[config(default = "0.2")]
    pub plateau_factor: f64,

    #[config(default = "1e-7")]
    pub min_learning_rate: f64,

    /// `k` of the top-k accuracy metric
    #[config(default = "3")]
    pub top_k: usize,

    /// Seed for shuffling and augmentation
    #[config(default = "42")]
    pub seed: u64,
}

impl TrainingConfig {
    /// Epochs of the frozen and fine-tuning phases
    ///
    /// The first phase gets `epochs / 2`, the second the remainder, so an
    /// odd total gives the extra epoch to fine-tuning.
    pub fn phase_epochs(&self) -> (usize, usize) {
        let frozen = self.epochs / 2;
        (frozen, self.epochs - frozen)
    }

    /// Learning rate of the fine-tuning phase
    pub fn fine_tune_learning_rate(&self) -> f64 {
        self.learning_rate / self.fine_tune_lr_divisor
    }
}
