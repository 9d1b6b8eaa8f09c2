//! Object storage access
//!
//! All pipelines read and write through the [`ObjectStore`] trait:
//! - [`GcsStore`]: Google Cloud Storage JSON API over blocking HTTP
//! - [`LocalStore`]: a directory on disk laid out like a bucket
//!
//! Keys are always `/`-separated, regardless of host platform.

pub mod gcs;
pub mod local;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

pub use gcs::{GcsStore, TokenSource};
pub use local::LocalStore;

use crate::utils::error::{CropDiseaseError, Result};

/// Default bucket used by every pipeline
pub const DEFAULT_BUCKET: &str = "kenya-agri-farmwise-ml";

/// Metadata for one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object key
    pub key: String,
    /// Size in bytes, when the backend reports it
    pub size: Option<u64>,
}

/// A flat key/value blob store
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store writes into
    fn bucket(&self) -> &str;

    /// List every object whose key starts with `prefix`, sorted by key
    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Fetch the full contents of one object
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Create or overwrite one object
    fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    /// Addressable URI of an object, as written into manifests
    fn uri(&self, key: &str) -> String;

    /// Upload a local file under `key`
    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let data = fs::read(path)?;
        self.put(key, data, content_type_for(path))
    }
}

/// Storage configuration shared by every entrypoint
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Bucket name
    pub bucket: String,
    /// Cloud project id (informational)
    pub project_id: Option<String>,
    /// Use this directory as the object store instead of GCS
    pub storage_root: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            project_id: None,
            storage_root: None,
        }
    }
}

/// Open the store described by `config`
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    match &config.storage_root {
        Some(root) => {
            info!("Using local object store at {:?} (bucket '{}')", root, config.bucket);
            Ok(Arc::new(LocalStore::new(root, &config.bucket)?))
        }
        None => {
            info!(
                "Using Cloud Storage bucket gs://{} (project: {})",
                config.bucket,
                config.project_id.as_deref().unwrap_or("<default>")
            );
            Ok(Arc::new(GcsStore::from_env(&config.bucket)?))
        }
    }
}

/// A location that is either a `gs://bucket/prefix` URI or a local path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageUri {
    Gcs { bucket: String, prefix: String },
    Local(PathBuf),
}

impl StorageUri {
    /// Parse a path or `gs://` URI
    pub fn parse(s: &str) -> Result<Self> {
        match s.strip_prefix("gs://") {
            Some(rest) => {
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() {
                    return Err(CropDiseaseError::Config(format!(
                        "Missing bucket name in URI: {}",
                        s
                    )));
                }
                Ok(StorageUri::Gcs {
                    bucket: bucket.to_string(),
                    prefix: prefix.trim_matches('/').to_string(),
                })
            }
            None => Ok(StorageUri::Local(PathBuf::from(s))),
        }
    }
}

/// Join a key prefix and a relative path into a `/`-separated key
pub fn join_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let relative = relative.replace('\\', "/");
    let relative = relative.trim_start_matches('/');

    if prefix.is_empty() {
        relative.to_string()
    } else if relative.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Relative `/`-separated path of `path` under `base`
pub fn relative_key(path: &Path, base: &Path) -> Result<String> {
    let rel = path.strip_prefix(base).map_err(|_| {
        CropDiseaseError::InvalidInput(format!("{:?} is not inside {:?}", path, base))
    })?;

    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();

    Ok(parts.join("/"))
}

/// Best-effort MIME type from a file extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "json" => "application/json",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Download every object under `prefix` into `dest`, keeping the layout below the prefix
///
/// Directory placeholder keys (ending in `/`) are skipped.
pub fn download_prefix(store: &dyn ObjectStore, prefix: &str, dest: &Path) -> Result<Vec<PathBuf>> {
    let prefix = prefix.trim_matches('/');
    let objects = store.list(prefix)?;
    let mut written = Vec::with_capacity(objects.len());

    fs::create_dir_all(dest)?;

    for object in objects {
        if object.key.ends_with('/') {
            continue;
        }

        let relative = object
            .key
            .strip_prefix(prefix)
            .unwrap_or(&object.key)
            .trim_start_matches('/');

        if relative.is_empty() {
            continue;
        }

        let local_path = relative
            .split('/')
            .fold(dest.to_path_buf(), |acc, part| acc.join(part));

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = store.get(&object.key)?;
        fs::write(&local_path, data)?;
        debug!("Downloaded {} -> {:?}", object.key, local_path);
        written.push(local_path);
    }

    Ok(written)
}

/// Upload every file below `local_dir` under `prefix`, returning the written keys
pub fn upload_dir(store: &dyn ObjectStore, local_dir: &Path, prefix: &str) -> Result<Vec<String>> {
    if !local_dir.is_dir() {
        return Err(CropDiseaseError::PathNotFound(local_dir.to_path_buf()));
    }

    let mut keys = Vec::new();

    for entry in WalkDir::new(local_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let key = join_key(prefix, &relative_key(entry.path(), local_dir)?);
        store.put_file(&key, entry.path())?;
        info!("  Uploaded {}", key);
        keys.push(key);
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("datasets/plantvillage", "train/a.jpg"), "datasets/plantvillage/train/a.jpg");
        assert_eq!(join_key("/models/x/", "class_names.json"), "models/x/class_names.json");
        assert_eq!(join_key("", "a\\b.png"), "a/b.png");
        assert_eq!(join_key("prefix", ""), "prefix");
    }

    #[test]
    fn test_storage_uri_parse() {
        assert_eq!(
            StorageUri::parse("gs://bucket/models/run1/").unwrap(),
            StorageUri::Gcs {
                bucket: "bucket".to_string(),
                prefix: "models/run1".to_string()
            }
        );
        assert_eq!(
            StorageUri::parse("gs://bucket").unwrap(),
            StorageUri::Gcs {
                bucket: "bucket".to_string(),
                prefix: String::new()
            }
        );
        assert_eq!(
            StorageUri::parse("/tmp/model").unwrap(),
            StorageUri::Local(PathBuf::from("/tmp/model"))
        );
        assert!(StorageUri::parse("gs:///nobucket").is_err());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/B.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("class_names.json")), "application/json");
        assert_eq!(content_type_for(Path::new("model.mpk")), "application/octet-stream");
    }

    #[test]
    fn test_upload_then_download_prefix() {
        let store_dir = TempDir::new().unwrap();
        let store = LocalStore::new(store_dir.path(), "test-bucket").unwrap();

        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("nested")).unwrap();
        fs::write(src.path().join("model.mpk"), b"weights").unwrap();
        fs::write(src.path().join("nested/extra.bin"), b"extra").unwrap();

        let keys = upload_dir(&store, src.path(), "models/plant-disease-detector").unwrap();
        assert_eq!(
            keys,
            vec![
                "models/plant-disease-detector/model.mpk".to_string(),
                "models/plant-disease-detector/nested/extra.bin".to_string(),
            ]
        );

        let dest = TempDir::new().unwrap();
        let files = download_prefix(&store, "models/plant-disease-detector", dest.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(dest.path().join("model.mpk")).unwrap(), b"weights");
        assert_eq!(fs::read(dest.path().join("nested").join("extra.bin")).unwrap(), b"extra");
    }
}
