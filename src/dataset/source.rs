//! Dataset download from Kaggle
//!
//! Downloads a dataset archive through the Kaggle REST API and extracts it
//! into a per-dataset cache directory. A completed extraction is reused on
//! later runs.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::utils::error::{CropDiseaseError, Result};

const KAGGLE_API: &str = "https://www.kaggle.com/api/v1";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);
const COMPLETE_MARKER: &str = ".complete";

/// Kaggle API credentials
#[derive(Debug, Clone, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl KaggleCredentials {
    /// Read credentials from `KAGGLE_USERNAME`/`KAGGLE_KEY`, then `kaggle.json`
    pub fn discover() -> Result<Self> {
        if let (Ok(username), Ok(key)) = (std::env::var("KAGGLE_USERNAME"), std::env::var("KAGGLE_KEY")) {
            return Ok(Self { username, key });
        }

        let config_dir = match std::env::var("KAGGLE_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => home_dir()?.join(".kaggle"),
        };

        Self::from_file(&config_dir.join("kaggle.json"))
    }

    /// Read a `kaggle.json` credentials file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CropDiseaseError::Config(format!(
                "No Kaggle credentials: set KAGGLE_USERNAME/KAGGLE_KEY or create {:?}",
                path
            )));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| CropDiseaseError::Config("HOME is not set".to_string()))
}

/// A named public dataset (`owner/name`) and its local cache
#[derive(Debug, Clone)]
pub struct DatasetSource {
    owner: String,
    name: String,
    cache_root: PathBuf,
}

impl DatasetSource {
    /// Parse an `owner/name` handle, caching under `~/.cache/kagglehub`
    pub fn new(handle: &str) -> Result<Self> {
        let cache_root = home_dir()?.join(".cache").join("kagglehub");
        Self::with_cache_root(handle, cache_root)
    }

    /// Parse an `owner/name` handle with an explicit cache root
    pub fn with_cache_root<P: AsRef<Path>>(handle: &str, cache_root: P) -> Result<Self> {
        let (owner, name) = handle
            .split_once('/')
            .filter(|(o, n)| !o.is_empty() && !n.is_empty() && !n.contains('/'))
            .ok_or_else(|| {
                CropDiseaseError::InvalidInput(format!(
                    "Dataset handle must look like 'owner/name', got '{}'",
                    handle
                ))
            })?;

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            cache_root: cache_root.as_ref().to_path_buf(),
        })
    }

    /// `owner/name`
    pub fn handle(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Cache directory for this dataset
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_root.join("datasets").join(&self.owner).join(&self.name)
    }

    /// Directory the archive is extracted into
    pub fn extracted_dir(&self) -> PathBuf {
        self.cache_dir().join("extracted")
    }

    /// Whether a finished extraction already exists
    pub fn is_cached(&self) -> bool {
        self.extracted_dir().join(COMPLETE_MARKER).exists()
    }

    /// Download and extract the dataset unless cached, returning the extracted root
    pub fn fetch(&self) -> Result<PathBuf> {
        let extracted = self.extracted_dir();

        if self.is_cached() {
            info!("Using cached dataset at {:?}", extracted);
            return Ok(extracted);
        }

        let credentials = KaggleCredentials::discover()?;
        let archive = self.cache_dir().join("archive.zip");
        fs::create_dir_all(self.cache_dir())?;

        self.download(&credentials, &archive)?;

        info!("Extracting {:?}...", archive);
        extract_zip(&archive, &extracted)?;
        File::create(extracted.join(COMPLETE_MARKER))?;
        fs::remove_file(&archive)?;
        info!("Dataset extracted to {:?}", extracted);

        Ok(extracted)
    }

    fn download(&self, credentials: &KaggleCredentials, dest: &Path) -> Result<()> {
        let url = format!("{}/datasets/download/{}/{}", KAGGLE_API, self.owner, self.name);
        info!("Downloading {} from Kaggle...", self.handle());

        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;

        let mut response = client
            .get(&url)
            .basic_auth(&credentials.username, Some(&credentials.key))
            .send()?;

        if !response.status().is_success() {
            return Err(CropDiseaseError::Http(format!(
                "Kaggle download of {} failed with {}",
                self.handle(),
                response.status()
            )));
        }

        let mut file = BufWriter::new(File::create(dest)?);
        let bytes = response.copy_to(&mut file)?;
        file.flush()?;
        info!("Download complete ({:.1} MB)", bytes as f64 / (1024.0 * 1024.0));

        Ok(())
    }
}

/// Extract a zip archive into `output_dir`
pub fn extract_zip(archive_path: &Path, output_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| CropDiseaseError::Dataset(format!("Failed to open archive: {}", e)))?;

    fs::create_dir_all(output_dir)?;
    archive
        .extract(output_dir)
        .map_err(|e| CropDiseaseError::Dataset(format!("Failed to extract archive: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_handle_parsing() {
        let dir = TempDir::new().unwrap();
        let source = DatasetSource::with_cache_root("abdallahalidev/plantvillage-dataset", dir.path()).unwrap();

        assert_eq!(source.handle(), "abdallahalidev/plantvillage-dataset");
        assert_eq!(
            source.cache_dir(),
            dir.path().join("datasets").join("abdallahalidev").join("plantvillage-dataset")
        );

        assert!(DatasetSource::with_cache_root("no-slash", dir.path()).is_err());
        assert!(DatasetSource::with_cache_root("a/b/c", dir.path()).is_err());
        assert!(DatasetSource::with_cache_root("/b", dir.path()).is_err());
    }

    #[test]
    fn test_cached_extraction_is_reused() {
        let dir = TempDir::new().unwrap();
        let source = DatasetSource::with_cache_root("owner/data", dir.path()).unwrap();
        assert!(!source.is_cached());

        fs::create_dir_all(source.extracted_dir()).unwrap();
        File::create(source.extracted_dir().join(COMPLETE_MARKER)).unwrap();

        assert!(source.is_cached());
        // No credentials or network needed when cached
        assert_eq!(source.fetch().unwrap(), source.extracted_dir());
    }

    #[test]
    fn test_credentials_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kaggle.json");
        fs::write(&path, r#"{"username": "farmer", "key": "secret"}"#).unwrap();

        let creds = KaggleCredentials::from_file(&path).unwrap();
        assert_eq!(creds.username, "farmer");
        assert_eq!(creds.key, "secret");

        assert!(KaggleCredentials::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_extract_zip() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("archive.zip");

        {
            let file = File::create(&archive_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("color/train/Apple___healthy/a.jpg", options).unwrap();
            writer.write_all(b"jpeg bytes").unwrap();
            writer.finish().unwrap();
        }

        let out = dir.path().join("out");
        extract_zip(&archive_path, &out).unwrap();

        let extracted = out.join("color/train/Apple___healthy/a.jpg");
        assert_eq!(fs::read(extracted).unwrap(), b"jpeg bytes");
    }
}
