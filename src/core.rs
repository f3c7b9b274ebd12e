use std::fmt;
use std::io::{Read, Seek};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::constants::{
    DEFAULT_IMAGE_FILENAME, DEFAULT_VIDEO_FILENAME, IMAGE_CONTENT_TYPE, VIDEO_CONTENT_TYPE,
};
use crate::error::{ApiError, EncodingError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Image,
    Video,
    Text,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Video => "video",
            Modality::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
        }
    }
}

/// One submitted unit of work, alive for a single entry-point call.
#[derive(Debug, Clone)]
pub struct Job {
    pub endpoint: String,
    pub request_body: Value,
    pub submitted_at: OffsetDateTime,
    pub request_id: Option<String>,
    pub raw_result: Option<Value>,
    status: JobStatus,
}

impl Job {
    pub fn new(endpoint: &str, request_body: Value) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            request_body,
            submitted_at: OffsetDateTime::now_utc(),
            request_id: None,
            raw_result: None,
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Terminal states never revert; returns whether the transition applied.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }
}

/// Handle to a queued remote request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobHandle {
    pub request_id: String,
    pub status_url: Option<String>,
    pub response_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// Status event observed while polling a queued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued { position: Option<u64> },
    InProgress,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalResult {
    Images(Vec<String>),
    Video(String),
    Text(String),
}

impl CanonicalResult {
    pub fn modality(&self) -> Modality {
        match self {
            CanonicalResult::Images(_) => Modality::Image,
            CanonicalResult::Video(_) => Modality::Video,
            CanonicalResult::Text(_) => Modality::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(values) => values.len(),
            PixelData::F32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dense array in the host's media layout.
///
/// Host outputs are always `[batch, height, width, 3]` `f32` in `[0, 1]`.
/// Inputs may be `[h, w]`, `[h, w, c]`, `[c, h, w]`, `[n, h, w, c]` or
/// `[n, c, h, w]` with `u8` or float samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    shape: Vec<usize>,
    data: PixelData,
}

impl PixelBuffer {
    pub fn new(shape: Vec<usize>, data: PixelData) -> Result<Self, EncodingError> {
        let Some(expected) = shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        else {
            return Err(EncodingError::UnsupportedLayout(format!(
                "shape {shape:?} is too large"
            )));
        };
        if shape.is_empty() || expected != data.len() {
            return Err(EncodingError::UnsupportedLayout(format!(
                "shape {:?} does not match {} samples",
                shape,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, EncodingError> {
        Self::new(shape, PixelData::F32(values))
    }

    pub fn from_u8(shape: Vec<usize>, values: Vec<u8>) -> Result<Self, EncodingError> {
        Self::new(shape, PixelData::U8(values))
    }

    pub fn zeros(batch: usize, height: usize, width: usize) -> Self {
        Self {
            shape: vec![batch, height, width, 3],
            data: PixelData::F32(vec![0.0; batch * height * width * 3]),
        }
    }

    /// `[n, h, w, 3]` float batch; `values` must hold exactly `n * h * w * 3` samples.
    pub(crate) fn rgb_batch(batch: usize, height: usize, width: usize, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), batch * height * width * 3);
        Self {
            shape: vec![batch, height, width, 3],
            data: PixelData::F32(values),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            PixelData::F32(values) => Some(values),
            PixelData::U8(_) => None,
        }
    }

    pub fn batch_len(&self) -> usize {
        if self.shape.len() == 4 {
            self.shape[0]
        } else {
            1
        }
    }
}

/// Caller-supplied video metadata; only positive frame rates are honoured.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub loaded_fps: Option<f64>,
    pub source_fps: Option<f64>,
}

pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

pub enum MediaStream {
    Seekable(Box<dyn ReadSeek>),
    Forward(Box<dyn Read + Send>),
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaStream::Seekable(_) => write!(f, "MediaStream::Seekable"),
            MediaStream::Forward(_) => write!(f, "MediaStream::Forward"),
        }
    }
}

#[derive(Debug)]
pub enum MediaReference {
    Pixels(PixelBuffer),
    Frames(Vec<PixelBuffer>),
    FilePath(PathBuf),
    RawBytes {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    Stream {
        stream: MediaStream,
        name: Option<String>,
    },
    Url(String),
}

impl From<PixelBuffer> for MediaReference {
    fn from(buffer: PixelBuffer) -> Self {
        MediaReference::Pixels(buffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn default_filename(&self) -> &'static str {
        match self {
            MediaKind::Image => DEFAULT_IMAGE_FILENAME,
            MediaKind::Video => DEFAULT_VIDEO_FILENAME,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Image => IMAGE_CONTENT_TYPE,
            MediaKind::Video => VIDEO_CONTENT_TYPE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Remote inference API consumed by the runner and the uploader.
#[async_trait]
pub trait InferenceApi: Send + Sync {
    async fn submit(&self, endpoint: &str, body: &Value) -> Result<JobHandle, ApiError>;

    async fn status(&self, endpoint: &str, handle: &JobHandle) -> Result<RemoteStatus, ApiError>;

    async fn fetch_result(&self, endpoint: &str, handle: &JobHandle) -> Result<Value, ApiError>;

    async fn cancel(&self, endpoint: &str, handle: &JobHandle) -> Result<(), ApiError>;

    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<String, ApiError>;
}

/// Downloads result media by URL.
#[async_trait]
pub trait MediaFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}
