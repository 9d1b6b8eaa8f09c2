//! Pre-trained model deployment
//!
//! Wraps a published classifier record in [`PlantClassifier`], saves it as a
//! local artifact directory, and uploads that directory together with the
//! 38-label list to the serving prefix.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use burn::prelude::*;
use tracing::info;

use crate::model::{PlantClassifier, PlantClassifierConfig, MODEL_CONFIG_FILE, MODEL_FILE_STEM};
use crate::storage::{join_key, upload_dir, ObjectStore};
use crate::training::CLASS_NAMES_FILE;
use crate::utils::error::{CropDiseaseError, Result};
use crate::MODEL_PREFIX;

/// Local directory the wrapped model is saved to
pub const DEFAULT_OUTPUT_DIR: &str = "pretrained_plant_model";

const WEIGHTS_TIMEOUT: Duration = Duration::from_secs(600);

/// Labels uploaded alongside a deployed model, in output order
pub const DEPLOYED_CLASS_NAMES: [&str; 38] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
    "Blueberry___healthy",
    "Cherry___Powdery_mildew",
    "Cherry___healthy",
    "Corn___Cercospora_leaf_spot",
    "Corn___Common_rust",
    "Corn___Northern_Leaf_Blight",
    "Corn___healthy",
    "Grape___Black_rot",
    "Grape___Esca",
    "Grape___Leaf_blight",
    "Grape___healthy",
    "Orange___Haunglongbing",
    "Peach___Bacterial_spot",
    "Peach___healthy",
    "Pepper___Bacterial_spot",
    "Pepper___healthy",
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
    "Tomato___Spider_mites",
    "Tomato___Target_Spot",
    "Tomato___Yellow_Leaf_Curl_Virus",
    "Tomato___mosaic_virus",
    "Tomato___healthy",
];

/// Where the pre-trained record comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsSource {
    Url(String),
    Path(PathBuf),
}

/// What the record contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A full `PlantClassifier` record
    Classifier,
    /// A `Backbone` record; the head is freshly initialized
    Backbone,
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub source: WeightsSource,
    pub kind: RecordKind,
    pub model_config: PlantClassifierConfig,
    pub output_dir: PathBuf,
    pub prefix: String,
}

impl DeployOptions {
    pub fn new(source: WeightsSource) -> Self {
        Self {
            source,
            kind: RecordKind::Classifier,
            model_config: PlantClassifierConfig::new().with_num_classes(DEPLOYED_CLASS_NAMES.len()),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            prefix: MODEL_PREFIX.to_string(),
        }
    }
}

/// Keys written by a deployment
#[derive(Debug, Clone)]
pub struct DeploySummary {
    pub uploaded: Vec<String>,
    /// `gs://` URI of the model prefix
    pub location: String,
}

/// Download `url` to `dest`
pub fn download_weights(url: &str, dest: &Path) -> Result<()> {
    info!("Downloading pre-trained weights from {}", url);

    let client = reqwest::blocking::Client::builder()
        .timeout(WEIGHTS_TIMEOUT)
        .build()?;
    let mut response = client.get(url).send()?;

    if !response.status().is_success() {
        return Err(CropDiseaseError::Http(format!(
            "Weights download from {} failed with {}",
            url,
            response.status()
        )));
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(dest)?);
    let bytes = response.copy_to(&mut file)?;
    file.flush()?;
    info!("Downloaded {:.1} MB", bytes as f64 / (1024.0 * 1024.0));

    Ok(())
}

/// Local record path for `source`, downloading into `staging` when remote
fn materialize(source: &WeightsSource, staging: &Path) -> Result<PathBuf> {
    match source {
        WeightsSource::Path(path) => {
            if !path.exists() {
                return Err(CropDiseaseError::PathNotFound(path.clone()));
            }
            Ok(path.clone())
        }
        WeightsSource::Url(url) => {
            let dest = staging.join("pretrained.mpk");
            download_weights(url, &dest)?;
            Ok(dest)
        }
    }
}

/// Build the classifier from a record and save it as an artifact directory
pub fn package_model<B: Backend>(
    record: &Path,
    kind: RecordKind,
    model_config: &PlantClassifierConfig,
    output_dir: &Path,
    device: &B::Device,
) -> Result<PlantClassifier<B>> {
    let model = match kind {
        RecordKind::Classifier => PlantClassifier::<B>::load(model_config, record, device)?,
        RecordKind::Backbone => PlantClassifier::<B>::new(model_config, device).with_backbone_weights(record, device)?,
    };
    info!("Model loaded successfully ({} classes)", model.num_classes());

    fs::create_dir_all(output_dir)?;
    model.save(&output_dir.join(format!("{}.mpk", MODEL_FILE_STEM)))?;
    model_config.save(output_dir.join(MODEL_CONFIG_FILE))?;
    info!("Model saved to {:?}", output_dir);

    Ok(model)
}

/// Package the pre-trained model and upload it with its label list
pub fn deploy<B: Backend>(options: &DeployOptions, store: &dyn ObjectStore, device: &B::Device) -> Result<DeploySummary> {
    deploy_staged::<B>(options, store, device, &std::env::temp_dir())
}

/// [`deploy`] with downloads staged under `staging_root`
///
/// The staging directory is removed when this returns, on error as well.
fn deploy_staged<B: Backend>(
    options: &DeployOptions,
    store: &dyn ObjectStore,
    device: &B::Device,
    staging_root: &Path,
) -> Result<DeploySummary> {
    let staging = tempfile::Builder::new()
        .prefix("crop_disease_deploy_")
        .tempdir_in(staging_root)?;
    let record = materialize(&options.source, staging.path())?;

    package_model::<B>(&record, options.kind, &options.model_config, &options.output_dir, device)?;

    info!("Uploading to {}", store.uri(&options.prefix));
    let mut uploaded = upload_dir(store, &options.output_dir, &options.prefix)?;

    let labels_key = join_key(&options.prefix, CLASS_NAMES_FILE);
    store.put(
        &labels_key,
        serde_json::to_vec(&DEPLOYED_CLASS_NAMES[..])?,
        "application/json",
    )?;
    info!("Class names uploaded to {}", store.uri(&labels_key));
    uploaded.push(labels_key);

    Ok(DeploySummary {
        uploaded,
        location: format!("{}/", store.uri(&options.prefix)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceBackend;
    use crate::model::Backbone;
    use crate::storage::LocalStore;
    use burn::record::CompactRecorder;
    use tempfile::TempDir;

    fn small_config() -> PlantClassifierConfig {
        PlantClassifierConfig::new()
            .with_num_classes(DEPLOYED_CLASS_NAMES.len())
            .with_base_filters(2)
            .with_hidden_units(4)
    }

    #[test]
    fn test_deployed_labels_have_no_duplicates() {
        let unique: std::collections::HashSet<_> = DEPLOYED_CLASS_NAMES.iter().collect();
        assert_eq!(unique.len(), 38);
        assert!(DEPLOYED_CLASS_NAMES.iter().all(|l| l.contains("___")));
    }

    #[test]
    fn test_missing_weights_path() {
        let dir = TempDir::new().unwrap();
        let source = WeightsSource::Path(dir.path().join("missing.mpk"));
        assert!(matches!(
            materialize(&source, dir.path()),
            Err(CropDiseaseError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_failed_deploy_removes_staging() {
        let dir = TempDir::new().unwrap();
        let staging_root = dir.path().join("staging");
        fs::create_dir_all(&staging_root).unwrap();
        let store = LocalStore::new(dir.path().join("store"), "bucket").unwrap();

        let options = DeployOptions {
            model_config: small_config(),
            output_dir: dir.path().join("out"),
            ..DeployOptions::new(WeightsSource::Path(dir.path().join("missing.mpk")))
        };
        let result = deploy_staged::<InferenceBackend>(&options, &store, &Default::default(), &staging_root);

        assert!(matches!(result, Err(CropDiseaseError::PathNotFound(_))));
        assert_eq!(fs::read_dir(&staging_root).unwrap().count(), 0);
        assert!(store.list("").unwrap().is_empty());
    }

    #[test]
    fn test_deploy_uploads_artifact_and_labels() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config();

        let weights = dir.path().join("published.mpk");
        PlantClassifier::<InferenceBackend>::new(&config, &device)
            .save(&weights)
            .unwrap();

        let store = LocalStore::new(dir.path().join("store"), "bucket").unwrap();
        let options = DeployOptions {
            model_config: config,
            output_dir: dir.path().join("pretrained_plant_model"),
            ..DeployOptions::new(WeightsSource::Path(weights))
        };

        let summary = deploy::<InferenceBackend>(&options, &store, &device).unwrap();

        assert_eq!(summary.location, "gs://bucket/models/plant-disease-detector/");
        for key in [
            "models/plant-disease-detector/model.mpk",
            "models/plant-disease-detector/model_config.json",
            "models/plant-disease-detector/class_names.json",
        ] {
            assert!(summary.uploaded.contains(&key.to_string()), "missing {}", key);
        }

        let labels: Vec<String> =
            serde_json::from_slice(&store.get("models/plant-disease-detector/class_names.json").unwrap()).unwrap();
        assert_eq!(labels.len(), 38);
        assert_eq!(labels[30], "Tomato___Late_blight");
    }

    #[test]
    fn test_package_from_backbone_record() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config();

        let backbone_path = dir.path().join("backbone.mpk");
        Backbone::<InferenceBackend>::new(&config, &device)
            .save_file(backbone_path.clone(), &CompactRecorder::new())
            .unwrap();

        let out = dir.path().join("out");
        let model =
            package_model::<InferenceBackend>(&backbone_path, RecordKind::Backbone, &config, &out, &device).unwrap();

        assert_eq!(model.num_classes(), 38);
        assert!(out.join("model.mpk").exists());
        assert!(out.join(MODEL_CONFIG_FILE).exists());
    }
}
