//! Epoch-end callbacks
//!
//! Each callback is fed one metric per epoch and returns a decision the
//! trainer acts on: a checkpoint path, a new learning rate, or a stop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::utils::error::Result;

/// Keras-style default minimum improvement for the plateau scheduler
const PLATEAU_MIN_DELTA: f64 = 1e-4;

/// What early stopping decided at the end of an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopDecision {
    /// The monitored metric reached a new best
    pub improved: bool,
    /// Training should stop now
    pub stop: bool,
}

/// Stop when `val_loss` has not improved for `patience` epochs
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn on_epoch_end(&mut self, epoch: usize, val_loss: f64) -> StopDecision {
        if val_loss < self.best {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return StopDecision {
                improved: true,
                stop: false,
            };
        }

        self.wait += 1;
        let stop = self.wait >= self.patience;
        if stop {
            info!(
                "Early stopping: val_loss has not improved for {} epochs (best {:.4} at epoch {})",
                self.wait,
                self.best,
                self.best_epoch.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string())
            );
        }

        StopDecision {
            improved: false,
            stop,
        }
    }

    /// Epoch of the best metric so far
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Multiply the learning rate by `factor` after `patience` epochs without improvement
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Feed the epoch's `val_loss`, returning the learning rate for the next epoch
    pub fn step(&mut self, val_loss: f64, lr: f64) -> f64 {
        if val_loss < self.best - PLATEAU_MIN_DELTA {
            self.best = val_loss;
            self.wait = 0;
            return lr;
        }

        self.wait += 1;
        if self.wait >= self.patience && lr > self.min_lr {
            let new_lr = (lr * self.factor).max(self.min_lr);
            info!("Reducing learning rate: {:.2e} -> {:.2e}", lr, new_lr);
            self.wait = 0;
            return new_lr;
        }

        lr
    }
}

/// Decide where to save a checkpoint whenever `val_accuracy` improves
#[derive(Debug, Clone)]
pub struct CheckpointSaver {
    dir: PathBuf,
    best: f64,
}

impl CheckpointSaver {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            best: f64::NEG_INFINITY,
        }
    }

    /// Record stem `model_<epoch:02>_<val_accuracy:.4>`
    pub fn file_stem(epoch: usize, val_accuracy: f64) -> String {
        format!("model_{:02}_{:.4}", epoch, val_accuracy)
    }

    /// Record path to save to if this epoch is a new best
    pub fn on_epoch_end(&mut self, epoch: usize, val_accuracy: f64) -> Option<PathBuf> {
        if val_accuracy > self.best {
            self.best = val_accuracy;
            Some(self.dir.join(format!("{}.mpk", Self::file_stem(epoch, val_accuracy))))
        } else {
            None
        }
    }
}

/// One row of `training_log.csv`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EpochRecord {
    pub phase: usize,
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_top_3_accuracy: f64,
    pub lr: f64,
}

/// Appends one CSV row per epoch, flushing after each
pub struct CsvLogger {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvLogger {
    /// Create (or truncate) the log file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: csv::Writer::from_writer(file),
        })
    }

    pub fn log(&mut self, record: &EpochRecord) -> Result<()> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
