//! Application state for the inference server

use std::sync::Arc;
use std::time::Instant;

use crop_disease::inference::InferenceService;

/// State shared by every handler
pub struct AppState {
    pub service: InferenceService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: InferenceService) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
