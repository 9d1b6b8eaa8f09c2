//! Directory-backed object store

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{relative_key, ObjectMeta, ObjectStore};
use crate::utils::error::{CropDiseaseError, Result};

/// Object store that maps keys onto files below a root directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    bucket: String,
}

impl LocalStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P, bucket: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            bucket: bucket.to_string(),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim_start_matches('/');
        if key.is_empty() || key.split('/').any(|part| part == "..") {
            return Err(CropDiseaseError::InvalidInput(format!("Invalid object key: '{}'", key)));
        }
        Ok(key.split('/').fold(self.root.clone(), |acc, part| acc.join(part)))
    }
}

impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();

        for entry in WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let key = relative_key(entry.path(), &self.root)?;
            if key.starts_with(prefix) {
                let size = entry.metadata().ok().map(|m| m.len());
                objects.push(ObjectMeta { key, size });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(CropDiseaseError::ObjectNotFound(key.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_list() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path(), "bucket").unwrap();

        store.put("a/b/c.txt", b"hello".to_vec(), "text/plain").unwrap();
        store.put("a/d.txt", b"world".to_vec(), "text/plain").unwrap();
        store.put("z.txt", b"!".to_vec(), "text/plain").unwrap();

        assert_eq!(store.get("a/b/c.txt").unwrap(), b"hello");

        let keys: Vec<String> = store.list("a/").unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["a/b/c.txt".to_string(), "a/d.txt".to_string()]);

        let all = store.list("").unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].size, Some(5));
    }

    #[test]
    fn test_missing_object() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path(), "bucket").unwrap();

        let err = store.get("nope.json").unwrap_err();
        assert!(matches!(err, CropDiseaseError::ObjectNotFound(_)));
    }

    #[test]
    fn test_rejects_parent_segments() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path(), "bucket").unwrap();

        assert!(store.put("../escape.txt", vec![1], "text/plain").is_err());
    }

    #[test]
    fn test_uri() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path(), "my-bucket").unwrap();
        assert_eq!(store.uri("datasets/x.jpg"), "gs://my-bucket/datasets/x.jpg");
    }
}
