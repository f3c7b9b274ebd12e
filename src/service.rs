use std::sync::Arc;

use serde_json::Value;

use crate::config::{AppConfig, JobSettings};
use crate::core::{
    CanonicalResult, MediaFetch, MediaKind, MediaReference, Modality, PixelBuffer, VideoInfo,
};
use crate::credentials::ClientProvider;
use crate::error::{ConfigurationError, ExtractionError, FalError};
use crate::fallback::{image_or_placeholder, text_or_message, video_or_message, FailureSite};
use crate::providers::fal::HttpFetcher;
use crate::results::ResultNormalizer;
use crate::runner::{JobRequest, JobRunner};
use crate::telemetry::RunMonitor;
use crate::uploader::MediaUploader;
use crate::video::VideoEncoder;

/// Node-facing entry points. None of the `run_*` calls return an error;
/// failures come back as the modality's fallback value.
#[derive(Clone)]
pub struct JobService {
    provider: Arc<ClientProvider>,
    runner: JobRunner,
    normalizer: ResultNormalizer,
    uploader: Arc<MediaUploader>,
    settings: JobSettings,
    monitor: RunMonitor,
}

impl JobService {
    pub fn new(
        provider: Arc<ClientProvider>,
        fetcher: Arc<dyn MediaFetch>,
        settings: JobSettings,
    ) -> Self {
        let monitor = RunMonitor::new();
        Self {
            runner: JobRunner::new(provider.clone(), monitor.clone()),
            normalizer: ResultNormalizer::new(fetcher),
            uploader: Arc::new(MediaUploader::new(provider.clone())),
            provider,
            settings,
            monitor,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigurationError> {
        let provider = Arc::new(ClientProvider::from_config(cfg));
        let fetcher = Arc::new(HttpFetcher::new(cfg.jobs.http_timeout)?);
        Ok(Self::new(provider, fetcher, cfg.jobs))
    }

    pub fn with_encoder(mut self, encoder: VideoEncoder) -> Self {
        self.uploader = Arc::new(MediaUploader::new(self.provider.clone()).with_encoder(encoder));
        self
    }

    pub fn provider(&self) -> &Arc<ClientProvider> {
        &self.provider
    }

    pub fn monitor(&self) -> &RunMonitor {
        &self.monitor
    }

    pub fn settings(&self) -> JobSettings {
        self.settings
    }

    pub(crate) fn site<'a>(&'a self, model: &'a str, endpoint: &'a str) -> FailureSite<'a> {
        FailureSite {
            monitor: &self.monitor,
            model,
            endpoint,
        }
    }

    async fn submit(
        &self,
        model: &str,
        modality: Modality,
        endpoint: &str,
        arguments: &Value,
    ) -> Result<Value, FalError> {
        let request = JobRequest::new(endpoint, arguments).labeled(model, modality);
        Ok(self
            .runner
            .run(request, self.settings.timeout, self.settings.poll_interval)
            .await?)
    }

    async fn images(&self, model: &str, endpoint: &str, arguments: &Value) -> Result<PixelBuffer, FalError> {
        let raw = self.submit(model, Modality::Image, endpoint, arguments).await?;
        Ok(self.normalizer.images(&raw).await?)
    }

    pub async fn run_image_job(&self, model: &str, endpoint: &str, arguments: &Value) -> PixelBuffer {
        let outcome = self.images(model, endpoint, arguments).await;
        image_or_placeholder(self.site(model, endpoint), outcome)
    }

    /// Same contract as [`run_image_job`](Self::run_image_job); kept for nodes
    /// that declare a single image output.
    pub async fn run_single_image_job(
        &self,
        model: &str,
        endpoint: &str,
        arguments: &Value,
    ) -> PixelBuffer {
        let outcome = self.images(model, endpoint, arguments).await;
        image_or_placeholder(self.site(model, endpoint), outcome)
    }

    /// Video URL without the fallback; the combined fan-out formats its own per-slot message.
    pub async fn video_url(
        &self,
        model: &str,
        endpoint: &str,
        arguments: &Value,
    ) -> Result<String, FalError> {
        let raw = self.submit(model, Modality::Video, endpoint, arguments).await?;
        match self.normalizer.extract(&raw, Modality::Video)? {
            CanonicalResult::Video(url) => Ok(url),
            _ => Err(ExtractionError::NoVideoUrl.into()),
        }
    }

    async fn text(&self, model: &str, endpoint: &str, arguments: &Value) -> Result<String, FalError> {
        let raw = self.submit(model, Modality::Text, endpoint, arguments).await?;
        match self.normalizer.extract(&raw, Modality::Text)? {
            CanonicalResult::Text(text) => Ok(text),
            _ => Err(ExtractionError::NoTextOutput.into()),
        }
    }

    pub async fn run_video_job(&self, model: &str, endpoint: &str, arguments: &Value) -> String {
        let outcome = self.video_url(model, endpoint, arguments).await;
        video_or_message(self.site(model, endpoint), outcome)
    }

    pub async fn run_text_job(&self, model: &str, endpoint: &str, arguments: &Value) -> String {
        let outcome = self.text(model, endpoint, arguments).await;
        text_or_message(self.site(model, endpoint), outcome)
    }

    /// Uploads media for use as a job argument; `None` on any failure.
    pub async fn upload(
        &self,
        media: MediaReference,
        kind: MediaKind,
        info: Option<&VideoInfo>,
    ) -> Option<String> {
        self.uploader.try_upload(media, kind, info).await
    }
}
