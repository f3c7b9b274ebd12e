use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::{
    env,
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants::{
    DEFAULT_HTTP_TIMEOUT_SECONDS, DEFAULT_JOB_TIMEOUT_SECONDS, DEFAULT_POLL_INTERVAL_SECONDS,
    DEFAULT_QUEUE_BASE, DEFAULT_STORAGE_BASE,
};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Api {
    pub key: Option<String>,
    pub queue_base: Option<String>,
    pub storage_base: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Jobs {
    pub timeout: Option<serde_yaml::Value>,
    pub poll_interval: Option<serde_yaml::Value>,
    pub http_timeout: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Root {
    pub api: Option<Api>,
    pub jobs: Option<Jobs>,
}

/// Timing knobs shared by the runner, the uploader and result downloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs_f64(DEFAULT_JOB_TIMEOUT_SECONDS),
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECONDS),
            http_timeout: Duration::from_secs_f64(DEFAULT_HTTP_TIMEOUT_SECONDS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub queue_base: String,
    pub storage_base: String,
    pub jobs: JobSettings,
}

impl AppConfig {
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let root = match path {
            Some(p) => Some(Self::read_yaml(Path::new(p))?),
            None => match Self::discover() {
                Some(found) => Some(Self::read_yaml(&found)?),
                None => None,
            },
        };
        Self::from_sources(root, |name| env::var(name).ok())
    }

    fn discover() -> Option<PathBuf> {
        for candidate in ["falkit.yaml", "falkit.yml"] {
            let path = Path::new(candidate);
            if path.exists() {
                return Some(path.to_path_buf());
            }
        }
        dirs::config_dir()
            .map(|dir| dir.join("falkit").join("config.yaml"))
            .filter(|path| path.exists())
    }

    fn read_yaml(path: &Path) -> anyhow::Result<Root> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        serde_yaml::from_reader(file).with_context(|| format!("parsing {}", path.display()))
    }

    /// Merges the file with environment overrides; `lookup` stands in for `env::var`.
    pub fn from_sources<F>(root: Option<Root>, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let r = root.unwrap_or_default();
        let api = r.api.unwrap_or_default();
        let jobs = r.jobs.unwrap_or_default();
        let defaults = JobSettings::default();

        let api_key = non_empty(lookup("FAL_KEY")).or_else(|| non_empty(api.key));
        let queue_base = non_empty(lookup("FAL_QUEUE_BASE"))
            .or_else(|| non_empty(api.queue_base))
            .unwrap_or_else(|| DEFAULT_QUEUE_BASE.to_string());
        let storage_base = non_empty(lookup("FAL_STORAGE_BASE"))
            .or_else(|| non_empty(api.storage_base))
            .unwrap_or_else(|| DEFAULT_STORAGE_BASE.to_string());

        let jobs = JobSettings {
            timeout: resolve_duration(
                "FAL_JOB_TIMEOUT",
                lookup("FAL_JOB_TIMEOUT"),
                jobs.timeout.as_ref(),
                defaults.timeout,
            )?,
            poll_interval: resolve_duration(
                "FAL_JOB_POLL_INTERVAL",
                lookup("FAL_JOB_POLL_INTERVAL"),
                jobs.poll_interval.as_ref(),
                defaults.poll_interval,
            )?,
            http_timeout: resolve_duration(
                "FAL_HTTP_TIMEOUT",
                lookup("FAL_HTTP_TIMEOUT"),
                jobs.http_timeout.as_ref(),
                defaults.http_timeout,
            )?,
        };

        Ok(Self {
            api_key,
            queue_base: queue_base.trim_end_matches('/').to_string(),
            storage_base: storage_base.trim_end_matches('/').to_string(),
            jobs,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve_duration(
    name: &str,
    env_value: Option<String>,
    file_value: Option<&serde_yaml::Value>,
    fallback: Duration,
) -> anyhow::Result<Duration> {
    if let Some(raw) = non_empty(env_value) {
        return parse_duration(&raw).ok_or_else(|| anyhow!("invalid duration for {name}: '{raw}'"));
    }
    match file_value {
        None | Some(serde_yaml::Value::Null) => Ok(fallback),
        Some(serde_yaml::Value::Number(num)) => num
            .as_f64()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| anyhow!("invalid duration for {name}: {num}")),
        Some(serde_yaml::Value::String(raw)) => {
            parse_duration(raw).ok_or_else(|| anyhow!("invalid duration for {name}: '{raw}'"))
        }
        Some(other) => Err(anyhow!("invalid duration for {name}: {other:?}")),
    }
}

/// Plain float seconds or a humantime string such as `10m`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<f64>() {
        if secs.is_finite() && secs > 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
        return None;
    }
    humantime::parse_duration(trimmed)
        .ok()
        .filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = AppConfig::from_sources(None, lookup(&[])).unwrap();
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.queue_base, DEFAULT_QUEUE_BASE);
        assert_eq!(cfg.jobs, JobSettings::default());
        assert_eq!(cfg.jobs.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn env_overrides_file() {
        let root: Root = serde_yaml::from_str(
            "api:\n  key: file-key\n  queue_base: https://queue.example/\njobs:\n  timeout: 120\n  poll_interval: \"500ms\"\n",
        )
        .unwrap();
        let cfg = AppConfig::from_sources(
            Some(root),
            lookup(&[("FAL_KEY", " env-key "), ("FAL_JOB_TIMEOUT", "10m")]),
        )
        .unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("env-key"));
        assert_eq!(cfg.queue_base, "https://queue.example");
        assert_eq!(cfg.jobs.timeout, Duration::from_secs(600));
        assert_eq!(cfg.jobs.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(AppConfig::from_sources(None, lookup(&[("FAL_HTTP_TIMEOUT", "soon")])).is_err());
        assert!(AppConfig::from_sources(None, lookup(&[("FAL_HTTP_TIMEOUT", "0")])).is_err());
    }

    #[test]
    fn loads_explicit_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("falkit.yaml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "jobs:\n  http_timeout: 5").unwrap();
        let root = AppConfig::read_yaml(&path).unwrap();
        let cfg = AppConfig::from_sources(Some(root), lookup(&[])).unwrap();
        assert_eq!(cfg.jobs.http_timeout, Duration::from_secs(5));
    }
}
