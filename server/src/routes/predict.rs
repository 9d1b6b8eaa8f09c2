//! Prediction endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::state::SharedState;

/// Error body `{"error": message}` with the given status
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Pull the base64 image out of a request body, or the 400 to send back
///
/// A present but empty `image` is passed through and fails to decode.
fn extract_image(body: &[u8]) -> Result<String, Response> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e)))?;

    match value.get("image") {
        None | Some(Value::Null) => Err(error_response(StatusCode::BAD_REQUEST, "No image provided")),
        Some(Value::String(image)) => Ok(image.clone()),
        Some(_) => Err(error_response(
            StatusCode::BAD_REQUEST,
            "Field 'image' must be a base64 string",
        )),
    }
}

/// POST /predict - Classify a base64 leaf image
pub async fn predict(State(state): State<SharedState>, body: Bytes) -> Response {
    let image = match extract_image(&body) {
        Ok(image) => image,
        Err(response) => return response,
    };

    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || service.diagnose(&image)).await {
        Ok(Ok(prediction)) => {
            info!(
                "Predicted {} ({:.2}%)",
                prediction.disease, prediction.confidence
            );
            (StatusCode::OK, Json(prediction)).into_response()
        }
        Ok(Err(e)) => {
            error!("Prediction failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("Prediction task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// OPTIONS /predict - CORS preflight
pub async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "3600"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(result: Result<String, Response>) -> Option<StatusCode> {
        result.err().map(|r| r.status())
    }

    #[test]
    fn test_extract_image() {
        assert_eq!(extract_image(br#"{"image": "abc"}"#).ok(), Some("abc".to_string()));
        assert_eq!(status_of(extract_image(b"{}")), Some(StatusCode::BAD_REQUEST));
        assert_eq!(status_of(extract_image(br#"{"image": null}"#)), Some(StatusCode::BAD_REQUEST));
        assert_eq!(extract_image(br#"{"image": ""}"#).ok(), Some(String::new()));
        assert_eq!(status_of(extract_image(br#"{"image": 42}"#)), Some(StatusCode::BAD_REQUEST));
        assert_eq!(status_of(extract_image(b"not json")), Some(StatusCode::BAD_REQUEST));
    }
}
