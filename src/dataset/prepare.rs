//! Dataset preparation pipeline
//!
//! Uploads a local PlantVillage tree into the object store under
//! `<prefix>/<split>/<relative path>`, verifies the upload, and writes the
//! `uri,label` import manifest.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use walkdir::WalkDir;

use super::{is_image_file, is_image_key, DATASET_PREFIX};
use crate::storage::{join_key, relative_key, ObjectStore};
use crate::utils::error::Result;
use crate::utils::logging::UploadProgress;

/// Manifest file name, both locally and in the store
pub const MANIFEST_NAME: &str = "dataset_import.csv";

/// Names accepted for the validation split directory, in priority order
const VAL_DIR_NAMES: [&str; 3] = ["val", "valid", "validation"];

/// A dataset split as laid out in the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    /// Whole tree, when no train/val directories exist
    All,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::All => "all",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Preparation settings
#[derive(Debug, Clone)]
pub struct PrepareConfig {
    /// Key prefix for every uploaded object
    pub prefix: String,
    /// Log progress every N uploaded files
    pub log_interval: usize,
    /// Where the manifest is written locally
    pub manifest_path: PathBuf,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            prefix: DATASET_PREFIX.to_string(),
            log_interval: 100,
            manifest_path: PathBuf::from(MANIFEST_NAME),
        }
    }
}

/// Outcome of a full preparation run
#[derive(Debug, Clone, Default)]
pub struct PrepareSummary {
    /// Files uploaded per split
    pub uploaded: Vec<(Split, usize)>,
    /// Objects found per split during verification
    pub verified: Vec<(Split, usize)>,
    /// Rows written to the manifest
    pub manifest_rows: usize,
}

/// Locate the train and validation directories under `root`
///
/// Walks directories top-down; the first directory with a `train` child
/// supplies the train split and the first with a `val`/`valid`/`validation`
/// child supplies the val split. Falls back to the whole tree as `all`.
pub fn find_splits(root: &Path) -> Vec<(Split, PathBuf)> {
    let mut train_dir: Option<PathBuf> = None;
    let mut val_dir: Option<PathBuf> = None;

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let dir = entry.path();

        if train_dir.is_none() && dir.join("train").is_dir() {
            train_dir = Some(dir.join("train"));
        }

        if val_dir.is_none() {
            val_dir = VAL_DIR_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_dir());
        }

        if train_dir.is_some() && val_dir.is_some() {
            break;
        }
    }

    let mut splits = Vec::new();
    if let Some(dir) = train_dir {
        splits.push((Split::Train, dir));
    }
    if let Some(dir) = val_dir {
        splits.push((Split::Val, dir));
    }

    if splits.is_empty() {
        warn!("No train/val directories found under {:?}; uploading entire dataset", root);
        splits.push((Split::All, root.to_path_buf()));
    }

    splits
}

/// Uploads a dataset tree and builds its manifest
pub struct DatasetPreparer {
    store: Arc<dyn ObjectStore>,
    config: PrepareConfig,
}

impl DatasetPreparer {
    pub fn new(store: Arc<dyn ObjectStore>, config: PrepareConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PrepareConfig {
        &self.config
    }

    fn split_prefix(&self, split: Split) -> String {
        join_key(&self.config.prefix, split.name())
    }

    /// Upload every image file below `dir` as `split`
    pub fn upload_split(&self, split: Split, dir: &Path) -> Result<usize> {
        info!("Uploading {} split from {:?}...", split, dir);

        let split_prefix = self.split_prefix(split);
        let mut progress = UploadProgress::new(split.name(), dir, self.config.log_interval);

        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        {
            let key = join_key(&split_prefix, &relative_key(entry.path(), dir)?);
            self.store.put_file(&key, entry.path())?;
            progress.uploaded(&key);
        }

        Ok(progress.finish())
    }

    /// Find the splits under `root` and upload each of them
    pub fn upload_all(&self, root: &Path) -> Result<Vec<(Split, usize)>> {
        info!(
            "Uploading dataset to {}...",
            self.store.uri(&format!("{}/", self.config.prefix.trim_matches('/')))
        );

        let mut uploaded = Vec::new();
        for (split, dir) in find_splits(root) {
            let count = self.upload_split(split, &dir)?;
            uploaded.push((split, count));
        }

        Ok(uploaded)
    }

    /// Count stored objects in the train and val splits
    pub fn verify(&self) -> Result<Vec<(Split, usize)>> {
        info!("Verifying upload...");

        let mut counts = Vec::new();
        for split in [Split::Train, Split::Val] {
            let prefix = format!("{}/", self.split_prefix(split));
            let count = self.store.list(&prefix)?.len();
            info!("  {}: {} files", split, count);
            counts.push((split, count));
        }

        Ok(counts)
    }

    /// Manifest rows (`uri`, `label`) for every stored training image
    pub fn manifest_rows(&self) -> Result<Vec<(String, String)>> {
        let train_prefix = format!("{}/", self.split_prefix(Split::Train));
        let mut rows = Vec::new();

        for object in self.store.list(&train_prefix)? {
            if !is_image_key(&object.key) {
                continue;
            }

            let relative = &object.key[train_prefix.len()..];
            let parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
            // Needs at least <class>/<file> below the split
            if parts.len() < 2 {
                continue;
            }

            let label = parts[parts.len() - 2].to_string();
            rows.push((self.store.uri(&object.key), label));
        }

        Ok(rows)
    }

    /// Write the manifest locally and upload it next to the dataset
    pub fn create_manifest(&self) -> Result<usize> {
        info!("Creating dataset import CSV...");

        let rows = self.manifest_rows()?;
        write_manifest(&rows, &self.config.manifest_path)?;
        info!("CSV created: {:?} ({} images)", self.config.manifest_path, rows.len());

        let key = join_key(&self.config.prefix, MANIFEST_NAME);
        self.store.put_file(&key, &self.config.manifest_path)?;
        info!("CSV uploaded to {}", self.store.uri(&key));

        Ok(rows.len())
    }

    /// Upload, verify and build the manifest
    pub fn run(&self, root: &Path) -> Result<PrepareSummary> {
        let uploaded = self.upload_all(root)?;
        let verified = self.verify()?;
        let manifest_rows = self.create_manifest()?;

        Ok(PrepareSummary {
            uploaded,
            verified,
            manifest_rows,
        })
    }
}

/// Write `uri,label` rows without a header
pub fn write_manifest(rows: &[(String, String)], path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    for (uri, label) in rows {
        writer.write_record([uri.as_str(), label.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Remove local artifacts of a run; the download cache is kept
pub fn cleanup_local(manifest_path: &Path, dataset_path: &Path) -> Result<()> {
    info!("Cleaning up local files...");
    info!("Download cache preserved at {:?}", dataset_path);

    if manifest_path.exists() {
        fs::remove_file(manifest_path)?;
        info!("Removed {:?}", manifest_path);
    }

    Ok(())
}
