//! Shared constants for the falkit core.

pub const DEFAULT_QUEUE_BASE: &str = "https://queue.fal.run";
pub const DEFAULT_STORAGE_BASE: &str = "https://rest.alpha.fal.ai";
pub const STORAGE_TYPE: &str = "fal-cdn-v3";

pub const DEFAULT_HTTP_TIMEOUT_SECONDS: f64 = 30.0;
pub const DEFAULT_JOB_TIMEOUT_SECONDS: f64 = 600.0;
pub const DEFAULT_POLL_INTERVAL_SECONDS: f64 = 0.25;

pub const PLACEHOLDER_KEY: &str = "<your_fal_api_key_here>";

pub const DEFAULT_VIDEO_FPS: f64 = 24.0;
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";
pub const IMAGE_CONTENT_TYPE: &str = "image/png";
pub const DEFAULT_VIDEO_FILENAME: &str = "upload.mp4";
pub const DEFAULT_IMAGE_FILENAME: &str = "upload.png";

pub const PLACEHOLDER_IMAGE_SIZE: usize = 512;

pub const SERVICE_DISABLED: &str = "Service disabled";
pub const UPLOAD_FAILED_MESSAGE: &str = "Error: Unable to upload image.";

pub const KLING_PRO_ENDPOINT: &str = "fal-ai/kling-video/v1.6/pro/image-to-video";
pub const KLING_MASTER_ENDPOINT: &str = "fal-ai/kling-video/v2/master/image-to-video";
pub const MINIMAX_ENDPOINT: &str = "fal-ai/minimax/video-01-live/image-to-video";
pub const LUMA_ENDPOINT: &str = "fal-ai/luma-dream-machine/ray-2/image-to-video";
pub const VEO2_ENDPOINT: &str = "fal-ai/veo2/image-to-video";
pub const WAN_PRO_ENDPOINT: &str = "fal-ai/wan-pro/image-to-video";
