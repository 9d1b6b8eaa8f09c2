//! HTTP routes

pub mod health;
pub mod predict;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Default cap on a `/predict` body, base64 inflation included
pub const DEFAULT_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Build the application router
///
/// `body_limit` caps the size of a `/predict` request body in bytes.
pub fn router(state: SharedState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/predict",
            post(predict::predict)
                .options(predict::preflight)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use crop_disease::inference::{fallback_labels, DiseaseTable, InferenceService, RandomPredictor};
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::state::AppState;

    fn app() -> Router {
        let service = InferenceService::new(
            Arc::new(RandomPredictor::new(fallback_labels(), Some(11))),
            DiseaseTable::embedded().unwrap(),
        );
        router(Arc::new(AppState::new(service)), DEFAULT_BODY_LIMIT)
    }

    /// A noisy PNG that compresses badly, so its base64 form is large
    fn noisy_png_base64(side: u32) -> String {
        let mut seed: u32 = 0x2545_f491;
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(side, side, |_, _| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let [r, g, b, _] = seed.to_le_bytes();
            Rgb([r, g, b])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        STANDARD.encode(bytes)
    }

    fn leaf_base64() -> String {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(32, 32, Rgb([40, 150, 60]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        STANDARD.encode(bytes)
    }

    fn post_predict(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn allow_origin(response: &Response) -> Option<&str> {
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_health_reports_no_model() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(allow_origin(&response), Some("*"));
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], false);
    }

    #[tokio::test]
    async fn test_predict_returns_prediction() {
        let body = serde_json::json!({ "image": leaf_base64() }).to_string();
        let response = app().oneshot(post_predict(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(allow_origin(&response), Some("*"));

        let body = json_body(response).await;
        assert!(!body["disease"].as_str().unwrap().is_empty());
        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&confidence));
        assert!(body["severity"].is_string());
        assert!(body["symptoms"].is_array());
        assert!(body["treatment"].is_array());
        assert!(body["prevention"].is_array());
    }

    #[tokio::test]
    async fn test_predict_accepts_large_photo() {
        let image = noisy_png_base64(1000);
        assert!(image.len() > 2 * 1024 * 1024);

        let body = serde_json::json!({ "image": image }).to_string();
        let response = app().oneshot(post_predict(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(!body["disease"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_predict_body_over_limit_is_rejected() {
        let service = InferenceService::new(
            Arc::new(RandomPredictor::new(fallback_labels(), Some(11))),
            DiseaseTable::embedded().unwrap(),
        );
        let app = router(Arc::new(AppState::new(service)), 1024);

        let body = serde_json::json!({ "image": leaf_base64().repeat(20) }).to_string();
        let response = app.oneshot(post_predict(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_predict_without_image_is_bad_request() {
        let response = app().oneshot(post_predict("{}".to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(allow_origin(&response), Some("*"));
        let body = json_body(response).await;
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_predict_with_undecodable_image_is_server_error() {
        let body = serde_json::json!({ "image": STANDARD.encode(b"not an image") }).to_string();
        let response = app().oneshot(post_predict(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("decode"));
    }

    #[tokio::test]
    async fn test_predict_with_empty_image_is_server_error() {
        let body = serde_json::json!({ "image": "" }).to_string();
        let response = app().oneshot(post_predict(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_preflight() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/predict")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "3600");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }
}
