//! Logging Module
//!
//! `tracing` subscriber setup shared by the CLI and the server, plus the
//! progress reporter used while uploading dataset splits.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use super::error::{CropDiseaseError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level to display
    pub level: Level,
    /// Show the module path of each event
    pub include_target: bool,
    /// Colored output; off for log collectors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug level with module paths
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ansi_colors: true,
        }
    }

    /// Info level without colors, for Cloud Run / Vertex log collection
    pub fn production() -> Self {
        Self {
            ansi_colors: false,
            ..Self::default()
        }
    }
}

/// Parse a level name such as `debug` or `WARNING`, defaulting to info
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CropDiseaseError::Config(format!("Failed to initialize logging: {}", e)))
}

/// Reports progress while one dataset split is uploaded
#[derive(Debug)]
pub struct UploadProgress {
    split: String,
    dir: PathBuf,
    uploaded: usize,
    log_interval: usize,
    started: Instant,
}

impl UploadProgress {
    /// Log a line every `log_interval` uploaded files
    pub fn new(split: &str, dir: &Path, log_interval: usize) -> Self {
        Self {
            split: split.to_string(),
            dir: dir.to_path_buf(),
            uploaded: 0,
            log_interval: log_interval.max(1),
            started: Instant::now(),
        }
    }

    /// Count one uploaded file
    pub fn uploaded(&mut self, key: &str) {
        self.uploaded += 1;
        tracing::debug!("  {} <- {}", self.split, key);
        if self.uploaded % self.log_interval == 0 {
            tracing::info!("  {}: uploaded {} files...", self.split, self.uploaded);
        }
    }

    pub fn count(&self) -> usize {
        self.uploaded
    }

    /// Log the split summary and return the number of uploaded files
    pub fn finish(self) -> usize {
        let secs = self.started.elapsed().as_secs_f64();
        tracing::info!(
            "{} split uploaded from {:?}: {} files in {:.1}s",
            self.split,
            self.dir,
            self.uploaded,
            secs
        );
        self.uploaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("INFO"), Level::INFO);
        assert_eq!(parse_level("Warning"), Level::WARN);
        assert_eq!(parse_level(" error "), Level::ERROR);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_production_disables_colors() {
        let config = LogConfig::production();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.ansi_colors);
        assert!(LogConfig::verbose().include_target);
    }

    #[test]
    fn test_upload_progress_counts() {
        let mut progress = UploadProgress::new("train", Path::new("/data/train"), 100);
        for i in 0..250 {
            progress.uploaded(&format!("datasets/plantvillage/train/Apple___healthy/{}.jpg", i));
        }
        assert_eq!(progress.count(), 250);
        assert_eq!(progress.finish(), 250);
    }
}
