//! Utilities module for logging, error handling, and helper functions

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{CropDiseaseError, Result};
pub use logging::init_logging;

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Replace the separators of a PlantVillage label with human-readable ones
///
/// `Tomato___Late_blight` becomes `Tomato - Late blight`.
pub fn humanize_label(label: &str) -> String {
    label.replace("___", " - ").replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_humanize_label() {
        assert_eq!(humanize_label("Tomato___Late_blight"), "Tomato - Late blight");
        assert_eq!(humanize_label("Unknown"), "Unknown");
    }
}
