use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::core::{Job, JobStatus, Modality};

/// One finished (or abandoned) remote job.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub endpoint: String,
    pub model: Option<String>,
    pub modality: Option<Modality>,
    pub request_id: Option<String>,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub error: Option<String>,
}

impl JobEvent {
    pub fn from_job(
        job: &Job,
        model: Option<&str>,
        modality: Option<Modality>,
        error: Option<String>,
    ) -> Self {
        Self {
            endpoint: job.endpoint.clone(),
            model: model.map(str::to_string),
            modality,
            request_id: job.request_id.clone(),
            status: job.status(),
            started_at: job.submitted_at,
            finished_at: OffsetDateTime::now_utc(),
            error,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at)
            .as_seconds_f64()
            .max(0.0)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub total_jobs: usize,
    pub total_duration_seconds: f64,
    pub by_endpoint: BTreeMap<String, SummaryBucket>,
    pub by_status: BTreeMap<String, usize>,
    pub fallbacks: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct SummaryBucket {
    pub jobs: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub total_duration_seconds: f64,
}

/// Shared, cloneable recorder for job outcomes and fallback diagnostics.
#[derive(Clone, Default)]
pub struct RunMonitor {
    inner: Arc<Mutex<RunState>>,
}

#[derive(Default)]
struct RunState {
    events: Vec<JobEvent>,
    notes: Vec<Note>,
    first_started: Option<OffsetDateTime>,
    last_finished: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub name: String,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl RunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, event: JobEvent) {
        let mut state = self.state();
        if state
            .first_started
            .map_or(true, |first| event.started_at < first)
        {
            state.first_started = Some(event.started_at);
        }
        if state
            .last_finished
            .map_or(true, |last| event.finished_at > last)
        {
            state.last_finished = Some(event.finished_at);
        }
        state.events.push(event);
    }

    pub fn note_event(&self, name: &str, payload: serde_json::Value) {
        self.state().notes.push(Note {
            name: name.to_string(),
            payload,
            timestamp: OffsetDateTime::now_utc(),
        });
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.state().events.clone()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.state().notes.clone()
    }

    pub fn summarize(&self) -> RunSummary {
        let state = self.state();
        let mut summary = RunSummary {
            total_jobs: state.events.len(),
            fallbacks: state.notes.iter().filter(|n| n.name == "fallback").count(),
            ..RunSummary::default()
        };
        for event in &state.events {
            let duration = event.duration_seconds();
            summary.total_duration_seconds += duration;
            *summary
                .by_status
                .entry(event.status.as_str().to_string())
                .or_default() += 1;

            let bucket = summary
                .by_endpoint
                .entry(event.endpoint.clone())
                .or_default();
            bucket.jobs += 1;
            bucket.total_duration_seconds += duration;
            match event.status {
                JobStatus::Completed => bucket.completed += 1,
                JobStatus::TimedOut => bucket.timed_out += 1,
                _ => bucket.failed += 1,
            }
        }
        summary
    }

    /// Writes the run summary as pretty JSON, plus one line per job when `ndjson` is set.
    pub fn flush_summary(&self, to: &Path, ndjson: Option<&Path>) -> anyhow::Result<()> {
        if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let summary = self.summarize();
        let events = self.events();
        let (start, end, elapsed, notes) = {
            let state = self.state();
            let elapsed = match (state.first_started, state.last_finished) {
                (Some(s), Some(f)) => (f - s).max(Duration::ZERO).as_seconds_f64(),
                _ => 0.0,
            };
            (
                state.first_started.and_then(|t| t.format(&Rfc3339).ok()),
                state.last_finished.and_then(|t| t.format(&Rfc3339).ok()),
                elapsed,
                state.notes.clone(),
            )
        };

        let payload = json!({
            "totals": {
                "jobs": summary.total_jobs,
                "fallbacks": summary.fallbacks,
                "duration_sec": summary.total_duration_seconds,
            },
            "time": {
                "start": start,
                "end": end,
                "elapsed_sec": elapsed,
            },
            "by_status": summary.by_status,
            "by_endpoint": summary.by_endpoint,
            "notes": notes,
        });

        let mut file = File::create(to)?;
        file.write_all(serde_json::to_string_pretty(&payload)?.as_bytes())?;

        if let Some(ndjson_path) = ndjson {
            if let Some(parent) = ndjson_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut ndjson_file = File::create(ndjson_path)?;
            for event in events {
                let line = json!({
                    "endpoint": event.endpoint,
                    "model": event.model,
                    "modality": event.modality,
                    "request_id": event.request_id,
                    "status": event.status,
                    "start_utc": event.started_at.format(&Rfc3339).ok(),
                    "end_utc": event.finished_at.format(&Rfc3339).ok(),
                    "latency_ms": (event.duration_seconds() * 1000.0).round() as i64,
                    "error": event.error,
                });
                ndjson_file.write_all(serde_json::to_string(&line)?.as_bytes())?;
                ndjson_file.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}
