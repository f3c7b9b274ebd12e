use serde_json::json;
use tracing::error;

use crate::constants::PLACEHOLDER_IMAGE_SIZE;
use crate::core::{Modality, PixelBuffer};
use crate::error::FalError;
use crate::telemetry::RunMonitor;

/// Where a failure happened, for the diagnostic record.
#[derive(Clone, Copy)]
pub struct FailureSite<'a> {
    pub monitor: &'a RunMonitor,
    pub model: &'a str,
    pub endpoint: &'a str,
}

/// Solid black batch-of-one returned in place of failed image results.
pub fn placeholder_image() -> PixelBuffer {
    PixelBuffer::zeros(1, PLACEHOLDER_IMAGE_SIZE, PLACEHOLDER_IMAGE_SIZE)
}

pub fn video_error_message(message: &str) -> String {
    format!("Error: Unable to generate video. Details: {message}")
}

pub fn text_error_message(message: &str) -> String {
    format!("Error: Unable to generate text. Details: {message}")
}

/// Logs the failure and notes it on the monitor; returns the user-facing message.
pub fn report(site: FailureSite<'_>, modality: Modality, err: &FalError) -> String {
    let message = err.message();
    let endpoint = err.endpoint().unwrap_or(site.endpoint);
    error!(
        endpoint,
        model = site.model,
        modality = modality.as_str(),
        "Error generating {} with {}: {}",
        modality.as_str(),
        site.model,
        message
    );
    site.monitor.note_event(
        "fallback",
        json!({
            "endpoint": endpoint,
            "model": site.model,
            "modality": modality,
            "message": message,
        }),
    );
    message
}

pub fn image_or_placeholder(
    site: FailureSite<'_>,
    outcome: Result<PixelBuffer, FalError>,
) -> PixelBuffer {
    outcome.unwrap_or_else(|err| {
        report(site, Modality::Image, &err);
        placeholder_image()
    })
}

pub fn video_or_message(site: FailureSite<'_>, outcome: Result<String, FalError>) -> String {
    outcome.unwrap_or_else(|err| video_error_message(&report(site, Modality::Video, &err)))
}

pub fn text_or_message(site: FailureSite<'_>, outcome: Result<String, FalError>) -> String {
    outcome.unwrap_or_else(|err| text_error_message(&report(site, Modality::Text, &err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, JobError};

    fn site(monitor: &RunMonitor) -> FailureSite<'_> {
        FailureSite {
            monitor,
            model: "Flux Dev",
            endpoint: "fal-ai/flux/dev",
        }
    }

    #[test]
    fn image_failure_yields_black_square() {
        let monitor = RunMonitor::new();
        let image = image_or_placeholder(
            site(&monitor),
            Err(ExtractionError::NoImageUrls.into()),
        );
        assert_eq!(image.shape(), &[1, 512, 512, 3]);
        assert!(image.as_f32().unwrap().iter().all(|v| *v == 0.0));
        assert_eq!(image, placeholder_image());

        let notes = monitor.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].payload["model"], "Flux Dev");
        assert_eq!(notes[0].payload["modality"], "image");
    }

    #[test]
    fn video_and_text_failures_become_messages() {
        let monitor = RunMonitor::new();
        let timeout: FalError =
            JobError::new("fal-ai/veo2", "Request timed out while waiting for completion").into();
        assert_eq!(
            video_or_message(site(&monitor), Err(timeout)),
            "Error: Unable to generate video. Details: Request timed out while waiting for completion"
        );
        assert_eq!(
            text_or_message(site(&monitor), Err(ExtractionError::NoTextOutput.into())),
            "Error: Unable to generate text. Details: FAL response did not include textual output"
        );
        assert_eq!(
            text_or_message(site(&monitor), Ok("fine".into())),
            "fine"
        );

        let notes = monitor.notes();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].payload["endpoint"], "fal-ai/veo2");
        assert_eq!(notes[1].payload["endpoint"], "fal-ai/flux/dev");
    }
}
