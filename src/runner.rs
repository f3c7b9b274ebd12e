use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{InferenceApi, Job, JobHandle, JobStatus, Modality, RemoteStatus};
use crate::credentials::ClientProvider;
use crate::error::{ApiError, JobError};
use crate::telemetry::{JobEvent, RunMonitor};

pub const TIMEOUT_MESSAGE: &str = "Request timed out while waiting for completion";

/// What to run, plus the labels recorded alongside the job.
#[derive(Debug, Clone, Copy)]
pub struct JobRequest<'a> {
    pub endpoint: &'a str,
    pub body: &'a Value,
    pub model: Option<&'a str>,
    pub modality: Option<Modality>,
}

impl<'a> JobRequest<'a> {
    pub fn new(endpoint: &'a str, body: &'a Value) -> Self {
        Self {
            endpoint,
            body,
            model: None,
            modality: None,
        }
    }

    pub fn labeled(mut self, model: &'a str, modality: Modality) -> Self {
        self.model = Some(model);
        self.modality = Some(modality);
        self
    }
}

/// Submits a job, polls it to a terminal state and fetches the result.
#[derive(Clone)]
pub struct JobRunner {
    provider: Arc<ClientProvider>,
    monitor: RunMonitor,
}

impl JobRunner {
    pub fn new(provider: Arc<ClientProvider>, monitor: RunMonitor) -> Self {
        Self { provider, monitor }
    }

    pub async fn submit_and_await(
        &self,
        endpoint: &str,
        body: &Value,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Value, JobError> {
        self.run(JobRequest::new(endpoint, body), timeout, poll_interval)
            .await
    }

    pub async fn run(
        &self,
        request: JobRequest<'_>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Value, JobError> {
        let mut job = Job::new(request.endpoint, request.body.clone());
        let outcome = self.drive(&mut job, timeout, poll_interval).await;
        if outcome.is_err() {
            job.advance(JobStatus::Failed);
        }
        self.monitor.record(JobEvent::from_job(
            &job,
            request.model,
            request.modality,
            outcome.as_ref().err().map(|err| err.message.clone()),
        ));
        outcome
    }

    async fn drive(
        &self,
        job: &mut Job,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Value, JobError> {
        let endpoint = job.endpoint.clone();
        let fail = |message: String| JobError::new(endpoint.as_str(), message);

        let api = self
            .provider
            .get_client()
            .map_err(|err| fail(err.to_string()))?;
        let handle = api
            .submit(&endpoint, &job.request_body)
            .await
            .map_err(|err| fail(err.to_string()))?;
        job.request_id = Some(handle.request_id.clone());
        job.advance(JobStatus::InProgress);
        debug!(endpoint = %endpoint, request_id = %handle.request_id, "job submitted");

        let waited = tokio::select! {
            outcome = wait_for_completion(api.as_ref(), &endpoint, &handle, poll_interval) => Some(outcome),
            _ = tokio::time::sleep(timeout) => None,
        };
        match waited {
            None => {
                job.advance(JobStatus::TimedOut);
                if let Err(err) = api.cancel(&endpoint, &handle).await {
                    warn!(endpoint = %endpoint, request_id = %handle.request_id, error = %err, "cancel after timeout failed");
                }
                return Err(fail(TIMEOUT_MESSAGE.to_string()));
            }
            Some(Err(message)) => return Err(fail(message)),
            Some(Ok(())) => {}
        }

        let result = api
            .fetch_result(&endpoint, &handle)
            .await
            .map_err(|err| fail(err.to_string()))?;
        job.raw_result = Some(result.clone());
        if let Some(message) = result_error(&result) {
            return Err(fail(message));
        }
        job.advance(JobStatus::Completed);
        debug!(endpoint = %endpoint, request_id = %handle.request_id, "job completed");
        Ok(result)
    }
}

/// Status observations: one immediately, then one per `interval`.
fn status_events<'a>(
    api: &'a dyn InferenceApi,
    endpoint: &'a str,
    handle: &'a JobHandle,
    interval: Duration,
) -> impl Stream<Item = Result<RemoteStatus, ApiError>> + 'a {
    stream::unfold(true, move |first| async move {
        if !first {
            tokio::time::sleep(interval).await;
        }
        Some((api.status(endpoint, handle).await, false))
    })
}

async fn wait_for_completion(
    api: &dyn InferenceApi,
    endpoint: &str,
    handle: &JobHandle,
    interval: Duration,
) -> Result<(), String> {
    let events = status_events(api, endpoint, handle, interval);
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        match event.map_err(|err| err.to_string())? {
            RemoteStatus::Queued { position } => {
                debug!(endpoint, request_id = %handle.request_id, ?position, "job queued");
            }
            RemoteStatus::InProgress => {}
            RemoteStatus::Completed => return Ok(()),
            RemoteStatus::Failed(message) => return Err(message),
        }
    }
    Err("status stream ended before completion".to_string())
}

/// Error hidden inside an otherwise successful payload.
pub fn result_error(result: &Value) -> Option<String> {
    let Value::Object(map) = result else {
        return None;
    };
    if let Some(error) = map.get("error").filter(|value| is_truthy(value)) {
        return Some(match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
    }
    match map.get("status").and_then(Value::as_str) {
        Some("FAILED" | "ERROR") => Some(
            map.get("message")
                .filter(|value| is_truthy(value))
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| result.to_string()),
        ),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().map_or(true, |n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
