//! Transcription backends.
//!
//! Each backend wraps an external CLI: it receives already-normalized PCM
//! samples, writes them to a scratch WAV in a private temp directory, runs
//! the tool under the resource supervisor, and parses the tool's artifact
//! into plain transcript text. Backends never see the original untrusted
//! bytes, only the sandbox's canonical output.

mod pocketsphinx;
mod vosk;
mod whisper;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{GwError, GwResult};
use crate::supervisor::{self, ResourceLimits};
use crate::wav;

/// Names accepted by [`construct`], in default fallback priority order.
pub const REGISTERED_BACKENDS: &[&str] = &["whisper", "vosk", "pocketsphinx"];

/// Default ceilings for a backend CLI run. Recognition is heavier than
/// normalization, so these are looser than the sandbox limits.
const BACKEND_MEMORY_MB: u64 = 4096;
const BACKEND_CPU_SECONDS: u64 = 600;
const BACKEND_TIMEOUT: Duration = Duration::from_secs(300);

pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backend's CLI is currently runnable.
    fn check_availability(&self) -> bool;

    /// Transcribe normalized samples. The input is trusted at this point.
    fn transcribe_raw(&self, samples: &[i16], sample_rate: u32) -> GwResult<String>;
}

/// Instantiate a backend by name, verifying its CLI is present.
pub fn construct(name: &str, config: &Value) -> GwResult<Arc<dyn TranscriptionBackend>> {
    let backend: Arc<dyn TranscriptionBackend> = match name {
        "whisper" => Arc::new(whisper::WhisperBackend::new(config)),
        "vosk" => Arc::new(vosk::VoskBackend::new(config)),
        "pocketsphinx" => Arc::new(pocketsphinx::PocketsphinxBackend::new(config)),
        other => {
            return Err(GwError::BackendNotAvailable {
                backend: other.to_owned(),
                reason: format!("unknown backend, known: {}", REGISTERED_BACKENDS.join(", ")),
            });
        }
    };
    if !backend.check_availability() {
        return Err(GwError::BackendNotAvailable {
            backend: name.to_owned(),
            reason: "required binary not found on PATH".to_owned(),
        });
    }
    tracing::info!(backend = name, "backend initialized");
    Ok(backend)
}

/// Scratch WAV handoff: a temp directory owning the file plus its path.
/// The directory is removed when the returned guard drops.
fn scratch_wav(samples: &[i16], sample_rate: u32) -> GwResult<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("input.wav");
    std::fs::write(&path, wav::write_mono16(samples, sample_rate))?;
    Ok((dir, path))
}

/// Run a backend CLI under the supervisor with recognition-scale limits.
fn run_backend_cli(program: &str, args: &[String], timeout: Duration) -> GwResult<Vec<u8>> {
    let limits = ResourceLimits {
        max_memory_mb: BACKEND_MEMORY_MB,
        max_cpu_seconds: BACKEND_CPU_SECONDS,
        timeout,
    };
    let output = supervisor::supervise(program, args, Vec::new(), &limits)?;
    Ok(output.stdout)
}

fn config_str(config: &Value, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_owned)
}

fn config_timeout(config: &Value) -> Duration {
    config
        .get("timeout_secs")
        .and_then(Value::as_u64)
        .map_or(BACKEND_TIMEOUT, Duration::from_secs)
}

/// Binary override resolution: env var wins, then config, then the default.
fn resolve_binary(env_var: &str, config: &Value, default: &str) -> String {
    std::env::var(env_var)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| config_str(config, "binary"))
        .unwrap_or_else(|| default.to_owned())
}
