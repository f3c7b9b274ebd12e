//! Shared core for fal.ai generation nodes: credentials, media upload,
//! queued job execution, result normalisation and failure fallbacks.

pub mod config;
pub mod constants;
pub mod core;
pub mod credentials;
pub mod error;
pub mod fallback;
pub mod fanout;
pub mod pixels;
pub mod providers;
pub mod results;
pub mod runner;
pub mod service;
pub mod telemetry;
pub mod uploader;
pub mod utils;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::{CanonicalResult, MediaKind, MediaReference, Modality, PixelBuffer};
pub use crate::error::{FalError, JobError};
pub use crate::service::JobService;
