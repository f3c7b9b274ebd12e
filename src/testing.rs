//! In-memory doubles for the remote API and media downloads.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;

use crate::core::{InferenceApi, JobHandle, MediaFetch, RemoteStatus};
use crate::credentials::ClientFactory;
use crate::error::{ApiError, ConfigurationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub content_type: String,
    pub file_name: String,
    pub size: usize,
}

/// Scripted queue: each endpoint replays its status list, repeating the last entry.
#[derive(Default)]
pub struct ScriptedApi {
    statuses: HashMap<String, Vec<RemoteStatus>>,
    results: HashMap<String, Value>,
    submit_failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    upload_response: Option<Result<String, String>>,
    cancel_failure: Option<String>,
    cursors: Mutex<HashMap<String, usize>>,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    pub cancels: AtomicUsize,
    pub uploads: Mutex<Vec<UploadRecord>>,
}

impl ScriptedApi {
    pub fn with_result(mut self, endpoint: &str, result: Value) -> Self {
        self.statuses.entry(endpoint.to_string()).or_insert_with(|| {
            vec![
                RemoteStatus::Queued { position: Some(1) },
                RemoteStatus::InProgress,
                RemoteStatus::Completed,
            ]
        });
        self.results.insert(endpoint.to_string(), result);
        self
    }

    pub fn with_statuses(mut self, endpoint: &str, statuses: Vec<RemoteStatus>) -> Self {
        self.statuses.insert(endpoint.to_string(), statuses);
        self
    }

    pub fn stalled(self, endpoint: &str) -> Self {
        self.with_statuses(endpoint, vec![RemoteStatus::InProgress])
    }

    pub fn failing_submit(mut self, endpoint: &str, message: &str) -> Self {
        self.submit_failures
            .insert(endpoint.to_string(), message.to_string());
        self
    }

    pub fn with_delay(mut self, endpoint: &str, delay: Duration) -> Self {
        self.delays.insert(endpoint.to_string(), delay);
        self
    }

    pub fn with_upload_url(mut self, url: &str) -> Self {
        self.upload_response = Some(Ok(url.to_string()));
        self
    }

    pub fn failing_upload(mut self, message: &str) -> Self {
        self.upload_response = Some(Err(message.to_string()));
        self
    }

    pub fn failing_cancel(mut self, message: &str) -> Self {
        self.cancel_failure = Some(message.to_string());
        self
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn upload_records(&self) -> Vec<UploadRecord> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceApi for ScriptedApi {
    async fn submit(&self, endpoint: &str, _body: &Value) -> Result<JobHandle, ApiError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(endpoint) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.submit_failures.get(endpoint) {
            return Err(ApiError::Http {
                status: 422,
                reason: "Unprocessable Entity".into(),
                detail: message.clone(),
            });
        }
        Ok(JobHandle {
            request_id: format!("req-{endpoint}"),
            ..JobHandle::default()
        })
    }

    async fn status(&self, endpoint: &str, _handle: &JobHandle) -> Result<RemoteStatus, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let Some(script) = self.statuses.get(endpoint) else {
            return Ok(RemoteStatus::Completed);
        };
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors.entry(endpoint.to_string()).or_insert(0);
        let index = (*cursor).min(script.len().saturating_sub(1));
        *cursor += 1;
        Ok(script
            .get(index)
            .cloned()
            .unwrap_or(RemoteStatus::Completed))
    }

    async fn fetch_result(&self, endpoint: &str, _handle: &JobHandle) -> Result<Value, ApiError> {
        self.results
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ApiError::Protocol(format!("no scripted result for {endpoint}")))
    }

    async fn cancel(&self, _endpoint: &str, _handle: &JobHandle) -> Result<(), ApiError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        match &self.cancel_failure {
            Some(message) => Err(ApiError::Protocol(message.clone())),
            None => Ok(()),
        }
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<String, ApiError> {
        self.uploads.lock().unwrap().push(UploadRecord {
            content_type: content_type.to_string(),
            file_name: file_name.to_string(),
            size: bytes.len(),
        });
        match &self.upload_response {
            Some(Ok(url)) => Ok(url.clone()),
            Some(Err(message)) => Err(ApiError::Protocol(message.clone())),
            None => Ok(format!("https://cdn.example/{file_name}")),
        }
    }
}

pub struct CountingFactory {
    pub builds: Arc<AtomicUsize>,
    pub api: Arc<ScriptedApi>,
}

impl CountingFactory {
    pub fn new(api: Arc<ScriptedApi>) -> Self {
        Self {
            builds: Arc::new(AtomicUsize::new(0)),
            api,
        }
    }
}

impl ClientFactory for CountingFactory {
    fn build(&self, _key: &str) -> Result<Arc<dyn InferenceApi>, ConfigurationError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.api.clone())
    }
}

/// Serves fixed bytes per URL; anything else is a 404.
#[derive(Default)]
pub struct StaticFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), bytes);
        self
    }
}

#[async_trait]
impl MediaFetch for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.files.get(url).cloned().ok_or_else(|| ApiError::Http {
            status: 404,
            reason: "Not Found".into(),
            detail: url.to_string(),
        })
    }
}

pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}
