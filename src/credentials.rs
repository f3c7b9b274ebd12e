use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::constants::PLACEHOLDER_KEY;
use crate::core::InferenceApi;
use crate::error::ConfigurationError;
use crate::providers::fal::FalClient;

/// Builds a client handle for a given API key.
pub trait ClientFactory: Send + Sync {
    fn build(&self, key: &str) -> Result<Arc<dyn InferenceApi>, ConfigurationError>;
}

pub struct FalClientFactory {
    queue_base: String,
    storage_base: String,
    http_timeout: Duration,
}

impl FalClientFactory {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            queue_base: cfg.queue_base.clone(),
            storage_base: cfg.storage_base.clone(),
            http_timeout: cfg.jobs.http_timeout,
        }
    }
}

impl ClientFactory for FalClientFactory {
    fn build(&self, key: &str) -> Result<Arc<dyn InferenceApi>, ConfigurationError> {
        let client = FalClient::new(key, &self.queue_base, &self.storage_base, self.http_timeout)?;
        Ok(Arc::new(client))
    }
}

#[derive(Default)]
struct ProviderState {
    key: Option<String>,
    client: Option<Arc<dyn InferenceApi>>,
}

/// Holds the API key and a lazily built client.
///
/// Owned by the process entry point and shared by reference. Construction
/// and key refresh are serialised behind `build_lock`. The fast path for an
/// already built client is not lock-free: it takes a shared read lock on the
/// state, so concurrent readers never block each other.
pub struct ClientProvider {
    factory: Box<dyn ClientFactory>,
    state: RwLock<ProviderState>,
    build_lock: Mutex<()>,
}

impl ClientProvider {
    pub fn new(factory: Box<dyn ClientFactory>, key: Option<String>) -> Self {
        let key = normalize_key(key);
        warn_on_key(key.as_deref());
        Self {
            factory,
            state: RwLock::new(ProviderState { key, client: None }),
            build_lock: Mutex::new(()),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            Box::new(FalClientFactory::from_config(cfg)),
            cfg.api_key.clone(),
        )
    }

    pub fn key(&self) -> Option<String> {
        self.read().key.clone()
    }

    /// Returns the cached client, building it on first use.
    pub fn get_client(&self) -> Result<Arc<dyn InferenceApi>, ConfigurationError> {
        {
            let state = self.read();
            if state.key.is_none() {
                return Err(ConfigurationError::MissingKey);
            }
            if let Some(client) = &state.client {
                return Ok(client.clone());
            }
        }

        let _guard = self
            .build_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = {
            let state = self.read();
            if let Some(client) = &state.client {
                return Ok(client.clone());
            }
            state.key.clone().ok_or(ConfigurationError::MissingKey)?
        };
        let client = self.factory.build(&key)?;
        self.write().client = Some(client.clone());
        debug!("built API client");
        Ok(client)
    }

    /// Swaps the key and drops the cached client so the next call rebuilds it.
    pub fn refresh_key(&self, key: Option<&str>) {
        let _guard = self
            .build_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = normalize_key(key.map(str::to_string));
        warn_on_key(key.as_deref());
        let mut state = self.write();
        state.key = key;
        state.client = None;
    }

    fn read(&self) -> RwLockReadGuard<'_, ProviderState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProviderState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn normalize_key(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

fn warn_on_key(key: Option<&str>) {
    match key {
        None => warn!("FAL_KEY is not set; job submission will fail"),
        Some(PLACEHOLDER_KEY) => warn!("FAL_KEY is still set to the placeholder value"),
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::testing::{CountingFactory, ScriptedApi};

    fn make_provider(key: Option<&str>) -> (ClientProvider, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            builds: builds.clone(),
            api: Arc::new(ScriptedApi::default()),
        };
        (
            ClientProvider::new(Box::new(factory), key.map(str::to_string)),
            builds,
        )
    }

    #[test]
    fn missing_key_fails_fast() {
        let (provider, builds) = make_provider(None);
        assert!(matches!(
            provider.get_client(),
            Err(ConfigurationError::MissingKey)
        ));
        let (blank, _) = make_provider(Some("   "));
        assert!(blank.get_client().is_err());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn placeholder_key_only_warns() {
        let (provider, builds) = make_provider(Some(PLACEHOLDER_KEY));
        assert!(provider.get_client().is_ok());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_is_cached_until_key_refresh() {
        let (provider, builds) = make_provider(Some("first"));
        provider.get_client().unwrap();
        provider.get_client().unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        provider.refresh_key(Some(" second "));
        assert_eq!(provider.key().as_deref(), Some("second"));
        provider.get_client().unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        provider.refresh_key(None);
        assert!(provider.get_client().is_err());
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let (provider, builds) = make_provider(Some("key"));
        let provider = Arc::new(provider);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                std::thread::spawn(move || provider.get_client().map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
