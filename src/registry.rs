//! Backend registry: cached construction, per-name creation locks, and
//! ordered fallback.
//!
//! Construction goes through a factory map keyed by backend name, so new
//! backends register by adding a factory entry rather than by string-matched
//! type dispatch. Each backend is constructed at most once; concurrent first
//! lookups of the same name serialize on a per-name lock while lookups of
//! different names proceed independently. Idle per-name locks are evicted
//! once nothing holds them, bounding the lock table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::backend::{self, REGISTERED_BACKENDS, TranscriptionBackend};
use crate::error::{GwError, GwResult};

/// Lookups between lock-table eviction sweeps.
const SWEEP_EVERY: u64 = 32;

/// Idle time after which an unheld per-name lock is evicted.
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

pub type BackendFactory =
    Box<dyn Fn(&Value) -> GwResult<Arc<dyn TranscriptionBackend>> + Send + Sync>;

struct LockEntry {
    mutex: Arc<Mutex<()>>,
    last_used: Instant,
}

#[derive(Default)]
struct Cache {
    backends: HashMap<String, Arc<dyn TranscriptionBackend>>,
}

/// Final transcription result, annotated with which backend produced it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptionOutcome {
    pub text: String,
    pub backend_used: String,
    pub fallback_used: bool,
}

pub struct BackendRegistry {
    factories: Vec<(String, BackendFactory)>,
    configs: HashMap<String, Value>,
    default_backend: String,
    cache: Mutex<Cache>,
    locks: Mutex<HashMap<String, LockEntry>>,
    lookups: AtomicU64,
    lock_ttl: Duration,
}

impl BackendRegistry {
    /// Registry over the built-in backends, with `default_backend` used
    /// when a request names none.
    #[must_use]
    pub fn new(default_backend: &str) -> Self {
        let factories: Vec<(String, BackendFactory)> = REGISTERED_BACKENDS
            .iter()
            .map(|name| {
                let name = (*name).to_owned();
                let factory_name = name.clone();
                let factory: BackendFactory =
                    Box::new(move |config| backend::construct(&factory_name, config));
                (name, factory)
            })
            .collect();
        Self::with_factories(factories, default_backend, DEFAULT_LOCK_TTL)
    }

    #[must_use]
    pub fn with_factories(
        factories: Vec<(String, BackendFactory)>,
        default_backend: &str,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            factories,
            configs: HashMap::new(),
            default_backend: default_backend.to_owned(),
            cache: Mutex::new(Cache::default()),
            locks: Mutex::new(HashMap::new()),
            lookups: AtomicU64::new(0),
            lock_ttl,
        }
    }

    /// Per-backend construction config, applied before first lookup.
    pub fn set_config(&mut self, name: &str, config: Value) {
        self.configs.insert(name.to_owned(), config);
    }

    /// Known backend names, in registration order.
    #[must_use]
    pub fn known_backends(&self) -> Vec<String> {
        self.factories.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Names of backends whose CLIs are present, constructing (and caching)
    /// them as a side effect.
    #[must_use]
    pub fn list_available(&self) -> Vec<String> {
        self.known_backends()
            .iter()
            .filter(|name| self.get_backend(Some(name)).is_ok())
            .cloned()
            .collect()
    }

    /// Fetch a backend by name (default when `None`), constructing it on
    /// first use.
    pub fn get_backend(&self, name: Option<&str>) -> GwResult<Arc<dyn TranscriptionBackend>> {
        let name = name.unwrap_or(&self.default_backend);

        if !self.factories.iter().any(|(n, _)| n == name) {
            return Err(GwError::BackendNotAvailable {
                backend: name.to_owned(),
                reason: format!(
                    "unknown backend, known: {}",
                    self.known_backends().join(", ")
                ),
            });
        }

        if self.lookups.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_locks();
        }

        if let Some(cached) = self.cached(name) {
            self.touch_lock(name);
            return Ok(cached);
        }

        // Serialize construction per name so concurrent first lookups build
        // exactly one instance.
        let name_lock = self.name_lock(name);
        let _guard = name_lock.lock().expect("backend name lock poisoned");

        if let Some(cached) = self.cached(name) {
            return Ok(cached);
        }

        let config = self.configs.get(name).cloned().unwrap_or(Value::Null);
        let factory = self
            .factories
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
            .expect("factory checked above");
        let backend = factory(&config)?;

        let mut cache = self.cache.lock().expect("backend cache lock poisoned");
        cache.backends.insert(name.to_owned(), Arc::clone(&backend));
        Ok(backend)
    }

    /// Transcribe with automatic fallback across the remaining cached
    /// backends.
    ///
    /// Only inference failures fall back: an audio-level rejection means
    /// every backend would reject, and a construction failure surfaces as
    /// `BackendNotAvailable` so callers see which backend is missing.
    /// Fallback candidates are the already-constructed backends, walked in
    /// registration order.
    pub fn transcribe(
        &self,
        samples: &[i16],
        sample_rate: u32,
        requested: Option<&str>,
    ) -> GwResult<TranscriptionOutcome> {
        let primary = requested.unwrap_or(&self.default_backend).to_owned();
        let mut attempts: Vec<(String, String)> = Vec::new();

        match self.attempt(&primary, samples, sample_rate) {
            Ok(text) => {
                return Ok(TranscriptionOutcome {
                    text,
                    backend_used: primary,
                    fallback_used: false,
                });
            }
            Err(error) if !error.is_fallback_eligible() => return Err(error),
            Err(error) => {
                tracing::warn!(backend = %primary, %error, "primary backend failed, falling back");
                attempts.push((primary.clone(), error.to_string()));
            }
        }

        for name in self.cached_names() {
            if name == primary {
                continue;
            }
            match self.attempt(&name, samples, sample_rate) {
                Ok(text) => {
                    tracing::info!(backend = %name, "fallback backend succeeded");
                    return Ok(TranscriptionOutcome {
                        text,
                        backend_used: name,
                        fallback_used: true,
                    });
                }
                Err(error) if !error.is_fallback_eligible() => return Err(error),
                Err(error) => attempts.push((name, error.to_string())),
            }
        }

        Err(GwError::AllBackendsFailed { attempts })
    }

    /// Constructed backend names, in registration order.
    fn cached_names(&self) -> Vec<String> {
        let cache = self.cache.lock().expect("backend cache lock poisoned");
        self.factories
            .iter()
            .map(|(name, _)| name)
            .filter(|name| cache.backends.contains_key(*name))
            .cloned()
            .collect()
    }

    fn attempt(&self, name: &str, samples: &[i16], sample_rate: u32) -> GwResult<String> {
        let backend = self.get_backend(Some(name))?;
        backend.transcribe_raw(samples, sample_rate)
    }

    fn cached(&self, name: &str) -> Option<Arc<dyn TranscriptionBackend>> {
        self.cache
            .lock()
            .expect("backend cache lock poisoned")
            .backends
            .get(name)
            .cloned()
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let entry = locks.entry(name.to_owned()).or_insert_with(|| LockEntry {
            mutex: Arc::new(Mutex::new(())),
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        Arc::clone(&entry.mutex)
    }

    fn touch_lock(&self, name: &str) {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        if let Some(entry) = locks.get_mut(name) {
            entry.last_used = Instant::now();
        }
    }

    /// Drop idle per-name locks nobody is holding. A lock mid-construction
    /// has an outstanding Arc clone, so strong_count keeps it alive.
    fn sweep_locks(&self) {
        let ttl = self.lock_ttl;
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks.retain(|_, entry| {
            Arc::strong_count(&entry.mutex) > 1 || entry.last_used.elapsed() < ttl
        });
    }

    #[cfg(test)]
    pub(crate) fn lock_table_len(&self) -> usize {
        self.locks.lock().expect("lock table poisoned").len()
    }
}
