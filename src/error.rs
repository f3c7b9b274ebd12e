//! Error taxonomy for job submission, uploads and result handling.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("FAL_KEY is not configured. Set the FAL_KEY environment variable or api.key in the config file.")]
    MissingKey,

    #[error("failed to build API client: {0}")]
    Client(String),
}

/// Failures raised by the remote inference API seam.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status} {reason}: {detail}")]
    Http {
        status: u16,
        reason: String,
        detail: String,
    },

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Protocol(String),
}

impl ApiError {
    pub async fn from_response(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let reason = status.canonical_reason().unwrap_or("").to_string();
        let text = response.text().await.unwrap_or_default();
        ApiError::Http {
            status: status.as_u16(),
            reason,
            detail: http_error_detail(&text),
        }
    }
}

/// Prefer the payload's `error` field, then the JSON body, then the raw text.
pub fn http_error_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(payload) => match payload.get("error") {
            Some(Value::String(message)) if !message.is_empty() => message.clone(),
            Some(value) if !value.is_null() && value != &Value::Bool(false) => value.to_string(),
            _ => payload.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("video input did not contain any frames")]
    NoFrames,

    #[error("all video frames must share the same dimensions (frame {index} is {found_width}x{found_height}, expected {width}x{height})")]
    InconsistentFrames {
        index: usize,
        width: u32,
        height: u32,
        found_width: u32,
        found_height: u32,
    },

    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    #[error("video encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("video encoder failed: {0}")]
    EncoderFailed(String),

    #[error("encoded output was empty")]
    EmptyOutput,

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("invalid media source: {0}")]
    Source(String),

    #[error("cannot upload empty {0} data")]
    Empty(&'static str),

    #[error("upload returned an invalid url: {0:?}")]
    InvalidUrl(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Any failure between submission and a terminal job state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{endpoint}: {message}")]
pub struct JobError {
    pub endpoint: String,
    pub message: String,
}

impl JobError {
    pub fn new(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.message.contains("timed out")
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("FAL response did not include any image URLs")]
    NoImageUrls,

    #[error("FAL response did not include a video url")]
    NoVideoUrl,

    #[error("FAL response did not include textual output")]
    NoTextOutput,

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("failed to decode image from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("cannot stack images of different sizes ({first_width}x{first_height} vs {width}x{height})")]
    MismatchedImages {
        first_width: u32,
        first_height: u32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Error)]
pub enum FalError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl FalError {
    /// User-facing message; job failures drop the endpoint prefix.
    pub fn message(&self) -> String {
        match self {
            FalError::Job(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            FalError::Job(err) => Some(err.endpoint.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_detail_prefers_error_field() {
        assert_eq!(http_error_detail(r#"{"error":"bad prompt"}"#), "bad prompt");
        assert_eq!(
            http_error_detail(r#"{"detail":[{"msg":"x"}]}"#),
            r#"{"detail":[{"msg":"x"}]}"#
        );
        assert_eq!(http_error_detail("gateway down"), "gateway down");
    }

    #[test]
    fn job_error_message_drops_endpoint_for_users() {
        let err = FalError::from(JobError::new("fal-ai/flux/dev", "Request timed out"));
        assert_eq!(err.to_string(), "fal-ai/flux/dev: Request timed out");
        assert_eq!(err.message(), "Request timed out");
        assert_eq!(err.endpoint(), Some("fal-ai/flux/dev"));
    }
}
