use std::time::Duration;

use async_trait::async_trait;
use bytesize::ByteSize;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::constants::STORAGE_TYPE;
use crate::core::{InferenceApi, JobHandle, MediaFetch, RemoteStatus};
use crate::error::{ApiError, ConfigurationError};

/// Client for the fal queue and storage REST APIs.
pub struct FalClient {
    http: Client,
    key: String,
    queue_base: String,
    storage_base: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
    status_url: Option<String>,
    response_url: Option<String>,
    cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitiateUploadResponse {
    upload_url: String,
    file_url: String,
}

impl FalClient {
    pub fn new(
        key: &str,
        queue_base: &str,
        storage_base: &str,
        http_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let http = Client::builder()
            .connect_timeout(http_timeout)
            .timeout(http_timeout)
            .build()
            .map_err(|err| ConfigurationError::Client(err.to_string()))?;
        Ok(Self {
            http,
            key: key.to_string(),
            queue_base: queue_base.trim_end_matches('/').to_string(),
            storage_base: storage_base.trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(AUTHORIZATION, format!("Key {}", self.key))
    }

    fn request_url(&self, endpoint: &str, request_id: &str, suffix: &str) -> String {
        format!(
            "{}/{}/requests/{}{}",
            self.queue_base,
            app_id(endpoint),
            request_id,
            suffix
        )
    }

    fn status_url(&self, endpoint: &str, handle: &JobHandle) -> String {
        handle
            .status_url
            .clone()
            .unwrap_or_else(|| self.request_url(endpoint, &handle.request_id, "/status"))
    }

    fn response_url(&self, endpoint: &str, handle: &JobHandle) -> String {
        handle
            .response_url
            .clone()
            .unwrap_or_else(|| self.request_url(endpoint, &handle.request_id, ""))
    }

    fn cancel_url(&self, endpoint: &str, handle: &JobHandle) -> String {
        handle
            .cancel_url
            .clone()
            .unwrap_or_else(|| self.request_url(endpoint, &handle.request_id, "/cancel"))
    }
}

#[async_trait]
impl InferenceApi for FalClient {
    async fn submit(&self, endpoint: &str, body: &Value) -> Result<JobHandle, ApiError> {
        let url = format!("{}/{}", self.queue_base, endpoint.trim_matches('/'));
        let response = self
            .authorized(self.http.post(&url))
            .json(body)
            .send()
            .await?;
        let payload = json_or_error(response).await?;
        let submitted: SubmitResponse = serde_json::from_value(payload)
            .map_err(|err| ApiError::Protocol(format!("unexpected submit response: {err}")))?;
        debug!(endpoint, request_id = %submitted.request_id, "submitted request");
        Ok(JobHandle {
            request_id: submitted.request_id,
            status_url: submitted.status_url,
            response_url: submitted.response_url,
            cancel_url: submitted.cancel_url,
        })
    }

    async fn status(&self, endpoint: &str, handle: &JobHandle) -> Result<RemoteStatus, ApiError> {
        let response = self
            .authorized(self.http.get(self.status_url(endpoint, handle)))
            .send()
            .await?;
        let payload = json_or_error(response).await?;
        parse_status(&payload)
    }

    async fn fetch_result(&self, endpoint: &str, handle: &JobHandle) -> Result<Value, ApiError> {
        let response = self
            .authorized(self.http.get(self.response_url(endpoint, handle)))
            .send()
            .await?;
        json_or_error(response).await
    }

    async fn cancel(&self, endpoint: &str, handle: &JobHandle) -> Result<(), ApiError> {
        let response = self
            .authorized(self.http.put(self.cancel_url(endpoint, handle)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok(())
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<String, ApiError> {
        let initiate_url = format!(
            "{}/storage/upload/initiate?storage_type={}",
            self.storage_base, STORAGE_TYPE
        );
        let response = self
            .authorized(self.http.post(&initiate_url))
            .json(&json!({
                "content_type": content_type,
                "file_name": file_name,
            }))
            .send()
            .await?;
        let payload = json_or_error(response).await?;
        let initiated: InitiateUploadResponse = serde_json::from_value(payload)
            .map_err(|err| ApiError::Protocol(format!("unexpected upload response: {err}")))?;

        let size = ByteSize(bytes.len() as u64);
        let response = self
            .http
            .put(&initiated.upload_url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        debug!(file_name, content_type, size = %size, "uploaded media");
        Ok(initiated.file_url)
    }
}

/// Downloads result media with a bounded per-request timeout.
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ConfigurationError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigurationError::Client(err.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MediaFetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

async fn json_or_error(response: Response) -> Result<Value, ApiError> {
    if !response.status().is_success() {
        return Err(ApiError::from_response(response).await);
    }
    Ok(response.json::<Value>().await?)
}

/// `owner/app` prefix of an endpoint such as `fal-ai/flux/dev`.
pub fn app_id(endpoint: &str) -> String {
    endpoint
        .trim_matches('/')
        .split('/')
        .take(2)
        .collect::<Vec<_>>()
        .join("/")
}

pub fn parse_status(payload: &Value) -> Result<RemoteStatus, ApiError> {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match status {
        "IN_QUEUE" => Ok(RemoteStatus::Queued {
            position: payload.get("queue_position").and_then(Value::as_u64),
        }),
        "IN_PROGRESS" => Ok(RemoteStatus::InProgress),
        "COMPLETED" => match error_text(payload.get("error")) {
            Some(message) => Ok(RemoteStatus::Failed(message)),
            None => Ok(RemoteStatus::Completed),
        },
        "FAILED" | "ERROR" => Ok(RemoteStatus::Failed(
            error_text(payload.get("message"))
                .or_else(|| error_text(payload.get("error")))
                .unwrap_or_else(|| payload.to_string()),
        )),
        other => Err(ApiError::Protocol(format!(
            "unexpected queue status '{other}'"
        ))),
    }
}

fn error_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
