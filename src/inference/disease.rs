//! Disease-care lookup table
//!
//! Maps a disease key (the part of a label after `___`) to display name,
//! severity and care advice. The default table is compiled in from
//! `data/disease_info.json`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{CropDiseaseError, Result};
use crate::utils::humanize_label;

const EMBEDDED_TABLE: &str = include_str!("../../data/disease_info.json");

/// Severity of labels without a record
pub const DEFAULT_SEVERITY: &str = "Medium";

const GENERIC_SYMPTOMS: [&str; 4] = [
    "Leaf discoloration or spots",
    "Wilting or drooping leaves",
    "Stunted growth",
    "Unusual leaf patterns",
];

const GENERIC_TREATMENT: [&str; 4] = [
    "Remove affected plant parts",
    "Apply appropriate fungicide or pesticide",
    "Improve air circulation around plants",
    "Ensure proper watering schedule",
];

const GENERIC_PREVENTION: [&str; 4] = [
    "Use disease-resistant varieties",
    "Practice crop rotation",
    "Maintain proper plant spacing",
    "Monitor plants regularly for early detection",
];

/// One entry of the table as stored in JSON
///
/// Missing fields fall back to the cleaned label, [`DEFAULT_SEVERITY`] and
/// empty lists when resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiseaseRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub treatment: Vec<String>,
    #[serde(default)]
    pub prevention: Vec<String>,
}

/// Fully resolved care information for one label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiseaseInfo {
    pub name: String,
    pub severity: String,
    pub symptoms: Vec<String>,
    pub treatment: Vec<String>,
    pub prevention: Vec<String>,
}

impl DiseaseInfo {
    /// Generic advice for a label without a record
    pub fn generic(label: &str) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            name: humanize_label(label),
            severity: DEFAULT_SEVERITY.to_string(),
            symptoms: owned(&GENERIC_SYMPTOMS),
            treatment: owned(&GENERIC_TREATMENT),
            prevention: owned(&GENERIC_PREVENTION),
        }
    }

    fn from_record(label: &str, record: &DiseaseRecord) -> Self {
        Self {
            name: record.name.clone().unwrap_or_else(|| humanize_label(label)),
            severity: record
                .severity
                .clone()
                .unwrap_or_else(|| DEFAULT_SEVERITY.to_string()),
            symptoms: record.symptoms.clone(),
            treatment: record.treatment.clone(),
            prevention: record.prevention.clone(),
        }
    }
}

/// Key of a label: `Tomato___Late_blight` -> `Late_blight`
pub fn disease_key(label: &str) -> &str {
    match label.split_once("___") {
        Some((_, disease)) => disease,
        None => label,
    }
}

/// Read-only table of care records
#[derive(Debug, Clone, Default)]
pub struct DiseaseTable {
    records: HashMap<String, DiseaseRecord>,
}

impl DiseaseTable {
    pub fn from_json(json: &str) -> Result<Self> {
        let records: HashMap<String, DiseaseRecord> = serde_json::from_str(json)?;
        Ok(Self { records })
    }

    /// The table compiled into the binary
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_TABLE)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CropDiseaseError::PathNotFound(path.to_path_buf()));
        }
        let table = Self::from_json(&fs::read_to_string(path)?)?;
        info!("Loaded {} disease records from {:?}", table.len(), path);
        Ok(table)
    }

    /// `path` when given, otherwise the embedded table
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::embedded(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&DiseaseRecord> {
        self.records.get(key)
    }

    /// Care information for a predicted label, generic when unknown
    pub fn lookup(&self, label: &str) -> DiseaseInfo {
        match self.records.get(disease_key(label)) {
            Some(record) => DiseaseInfo::from_record(label, record),
            None => DiseaseInfo::generic(label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disease_key() {
        assert_eq!(disease_key("Tomato___Late_blight"), "Late_blight");
        assert_eq!(disease_key("Unknown"), "Unknown");
    }

    #[test]
    fn test_embedded_table_covers_fallback_labels() {
        let table = DiseaseTable::embedded().unwrap();
        for label in crate::dataset::FALLBACK_LABELS {
            assert!(table.get(disease_key(label)).is_some(), "no record for {}", label);
        }
    }

    #[test]
    fn test_lookup_known_label() {
        let table = DiseaseTable::from_json(
            r#"{"Late_blight": {"name": "Late Blight", "severity": "High", "symptoms": ["Dark lesions"]}}"#,
        )
        .unwrap();

        let info = table.lookup("Tomato___Late_blight");
        assert_eq!(info.name, "Late Blight");
        assert_eq!(info.severity, "High");
        assert_eq!(info.symptoms, vec!["Dark lesions".to_string()]);
        assert!(info.treatment.is_empty());
    }

    #[test]
    fn test_record_without_name_uses_clean_label() {
        let table = DiseaseTable::from_json(r#"{"Leaf_Mold": {}}"#).unwrap();
        let info = table.lookup("Tomato___Leaf_Mold");
        assert_eq!(info.name, "Tomato - Leaf Mold");
        assert_eq!(info.severity, DEFAULT_SEVERITY);
    }

    #[test]
    fn test_unknown_label_gets_generic_record() {
        let table = DiseaseTable::from_json("{}").unwrap();
        let info = table.lookup("Banana___Black_sigatoka");

        assert_eq!(info.name, "Banana - Black sigatoka");
        assert_eq!(info.severity, "Medium");
        assert_eq!(info.symptoms[0], "Leaf discoloration or spots");
        assert_eq!(info.treatment[3], "Ensure proper watering schedule");
        assert_eq!(info.prevention[3], "Monitor plants regularly for early detection");
    }

    #[test]
    fn test_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diseases.json");
        fs::write(&path, r#"{"Common_rust": {"name": "Common Rust"}}"#).unwrap();

        let table = DiseaseTable::load(Some(&path)).unwrap();
        assert_eq!(table.len(), 1);
        assert!(DiseaseTable::from_path(&dir.path().join("missing.json")).is_err());
    }
}
