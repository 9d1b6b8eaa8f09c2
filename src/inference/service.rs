//! Prediction service shared by the HTTP handlers

use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::disease::DiseaseTable;
use super::predictor::Predictor;
use super::preprocess::decode_base64_image;
use crate::utils::error::Result;

/// JSON body returned by `POST /predict`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub disease: String,
    /// Percentage, rounded to two decimals
    pub confidence: f64,
    pub severity: String,
    pub symptoms: Vec<String>,
    pub treatment: Vec<String>,
    pub prevention: Vec<String>,
}

/// Confidence in [0, 1] as a percentage rounded to two decimals
pub fn confidence_percent(confidence: f32) -> f64 {
    (f64::from(confidence) * 10_000.0).round() / 100.0
}

/// Predictor plus disease table, built once at startup
#[derive(Clone)]
pub struct InferenceService {
    predictor: Arc<dyn Predictor>,
    diseases: Arc<DiseaseTable>,
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("model_loaded", &self.predictor.is_model_loaded())
            .field("labels", &self.predictor.labels().len())
            .field("diseases", &self.diseases.len())
            .finish()
    }
}

impl InferenceService {
    pub fn new(predictor: Arc<dyn Predictor>, diseases: DiseaseTable) -> Self {
        Self {
            predictor,
            diseases: Arc::new(diseases),
        }
    }

    pub fn is_model_loaded(&self) -> bool {
        self.predictor.is_model_loaded()
    }

    pub fn labels(&self) -> &[String] {
        self.predictor.labels()
    }

    /// Classify a decoded image and attach its care record
    pub fn diagnose_image(&self, image: &DynamicImage) -> Result<PredictionResponse> {
        let prediction = self.predictor.predict(image)?;
        let info = self.diseases.lookup(&prediction.label);

        Ok(PredictionResponse {
            disease: info.name,
            confidence: confidence_percent(prediction.confidence),
            severity: info.severity,
            symptoms: info.symptoms,
            treatment: info.treatment,
            prevention: info.prevention,
        })
    }

    /// Decode a base64 payload, then [`Self::diagnose_image`]
    pub fn diagnose(&self, image_base64: &str) -> Result<PredictionResponse> {
        let image = decode_base64_image(image_base64)?;
        self.diagnose_image(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::predictor::{Prediction, RandomPredictor};
    use crate::utils::error::CropDiseaseError;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    struct FixedPredictor(Prediction, Vec<String>);

    impl Predictor for FixedPredictor {
        fn predict(&self, _image: &DynamicImage) -> Result<Prediction> {
            Ok(self.0.clone())
        }

        fn is_model_loaded(&self) -> bool {
            true
        }

        fn labels(&self) -> &[String] {
            &self.1
        }
    }

    fn fixed(label: &str, confidence: f32) -> InferenceService {
        let prediction = Prediction {
            label: label.to_string(),
            confidence,
        };
        InferenceService::new(
            Arc::new(FixedPredictor(prediction, vec![label.to_string()])),
            DiseaseTable::embedded().unwrap(),
        )
    }

    fn jpeg_base64() -> String {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(64, 48, Rgb([60, 140, 50]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_confidence_percent() {
        assert_eq!(confidence_percent(0.87654), 87.65);
        assert_eq!(confidence_percent(1.0), 100.0);
        assert_eq!(confidence_percent(0.0), 0.0);
    }

    #[test]
    fn test_known_label_uses_record() {
        let service = fixed("Tomato___Late_blight", 0.9);
        let response = service.diagnose(&jpeg_base64()).unwrap();

        assert_eq!(response.disease, "Late Blight");
        assert_eq!(response.severity, "High");
        assert_eq!(response.confidence, 90.0);
        assert!(!response.treatment.is_empty());
    }

    #[test]
    fn test_unknown_label_uses_generic_record() {
        let service = fixed("Unknown", 0.5);
        let response = service.diagnose(&jpeg_base64()).unwrap();

        assert_eq!(response.disease, "Unknown");
        assert_eq!(response.severity, "Medium");
        assert_eq!(response.symptoms.len(), 4);
        assert_eq!(response.prevention[0], "Use disease-resistant varieties");
    }

    #[test]
    fn test_random_fallback_response() {
        let labels: Vec<String> = crate::dataset::FALLBACK_LABELS.iter().map(|s| s.to_string()).collect();
        let service = InferenceService::new(
            Arc::new(RandomPredictor::new(labels, Some(3))),
            DiseaseTable::embedded().unwrap(),
        );
        assert!(!service.is_model_loaded());

        let response = service.diagnose(&jpeg_base64()).unwrap();
        assert!(!response.disease.is_empty());
        assert!((75.0..=95.0).contains(&response.confidence));
    }

    #[test]
    fn test_bad_payload_is_decode_error() {
        let service = fixed("Tomato___Late_blight", 0.9);
        assert!(matches!(
            service.diagnose("definitely not an image"),
            Err(CropDiseaseError::ImageDecode(_))
        ));
    }
}
