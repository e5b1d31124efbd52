//! Sandboxed ffmpeg normalization of untrusted audio.
//!
//! Every input passes four stages: per-client admission (request rate and
//! concurrency), an ffprobe pre-flight on the first megabyte, the guarded
//! transcoder invocation itself (circuit breaker + resource supervisor),
//! and output sanity checks. The transcoder always reads from stdin and
//! writes canonical mono 16kHz 16-bit WAV to stdout; the input never gets
//! an interpretable filename or shell exposure.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::SandboxConfig;
use crate::error::{GwError, GwResult};
use crate::supervisor::{self, LimitBreached, ResourceLimits, ResourceStats, SupervisedOutput};

const ADMISSION_WINDOW: Duration = Duration::from_secs(60);
const PROBE_HEAD_BYTES: usize = 1024 * 1024;
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a successful normalization.
#[derive(Debug)]
pub struct SandboxOutcome {
    /// Canonical WAV bytes (mono, 16kHz, 16-bit PCM).
    pub output: Vec<u8>,
    pub stats: ResourceStats,
}

pub struct SandboxExecutor {
    config: SandboxConfig,
    breaker: CircuitBreaker,
    admissions: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SandboxExecutor {
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_threshold,
            Duration::from_secs(config.breaker_reset_secs),
        );
        Self {
            config,
            breaker,
            admissions: Mutex::new(HashMap::new()),
        }
    }

    /// Normalize `input` to canonical WAV on behalf of `client_id`.
    pub fn normalize(&self, input: &[u8], client_id: &str) -> GwResult<SandboxOutcome> {
        self.admit(client_id, Instant::now())?;
        self.preflight(input)?;

        let args = build_transcoder_args(&self.config);
        let limits = ResourceLimits {
            max_memory_mb: self.config.max_memory_mb,
            max_cpu_seconds: self.config.max_cpu_seconds,
            timeout: Duration::from_secs(self.config.timeout_seconds),
        };
        let stdin_data = input.to_vec();
        let result = self
            .breaker
            .call(|| supervisor::supervise("ffmpeg", &args, stdin_data, &limits))?;

        if result.stdout.is_empty() {
            return Err(GwError::process("transcoder produced no output"));
        }
        let max_output = self.config.max_output_size_mb * 1024 * 1024;
        if result.stdout.len() as u64 > max_output {
            return Err(GwError::process(format!(
                "transcoder output exceeds {} MB",
                self.config.max_output_size_mb
            )));
        }

        tracing::info!(
            client = client_id,
            input_bytes = input.len(),
            output_bytes = result.stdout.len(),
            peak_memory_mb = result.stats.peak_memory_mb,
            wall_ms = result.stats.wall_ms,
            "normalized audio"
        );
        Ok(SandboxOutcome {
            output: result.stdout,
            stats: result.stats,
        })
    }

    /// Per-client admission: sliding one-minute request ceiling plus a
    /// concurrency bound approximated by entries younger than the sandbox
    /// timeout.
    fn admit(&self, client_id: &str, now: Instant) -> GwResult<()> {
        let mut admissions = self.admissions.lock().expect("admission lock poisoned");

        admissions.retain(|_, stamps| {
            stamps.retain(|t| now.duration_since(*t) <= ADMISSION_WINDOW);
            !stamps.is_empty()
        });

        let stamps = admissions.entry(client_id.to_owned()).or_default();
        if stamps.len() >= self.config.max_requests_per_minute {
            return Err(GwError::admission(format!(
                "sandbox rate limit exceeded: {} requests per minute",
                self.config.max_requests_per_minute
            )));
        }
        let in_flight = stamps
            .iter()
            .filter(|t| now.duration_since(**t) <= Duration::from_secs(self.config.timeout_seconds))
            .count();
        if in_flight >= self.config.max_concurrent_per_client {
            return Err(GwError::admission(format!(
                "too many concurrent requests: limit {}",
                self.config.max_concurrent_per_client
            )));
        }
        stamps.push(now);
        Ok(())
    }

    /// Probe the first megabyte with ffprobe before committing full sandbox
    /// resources. A probe that hangs marks the input malicious; a probe
    /// that merely errors is tolerated, since the hardened transcoder pass
    /// still stands between the input and the backends.
    fn preflight(&self, input: &[u8]) -> GwResult<()> {
        let max_input = self.config.max_output_size_mb * 1024 * 1024;
        if input.len() as u64 > max_input {
            return Err(GwError::validation(format!(
                "input exceeds {} MB",
                self.config.max_output_size_mb
            )));
        }

        if !supervisor::command_exists("ffprobe") {
            tracing::warn!("ffprobe not found, skipping pre-flight probe");
            return Ok(());
        }

        let head = &input[..input.len().min(PROBE_HEAD_BYTES)];
        let mut probe_file = tempfile::NamedTempFile::new()?;
        probe_file.write_all(head)?;
        probe_file.flush()?;
        let probe_path = probe_file.path().to_string_lossy().into_owned();

        let args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-print_format",
            "json",
            "-show_format",
            probe_path.as_str(),
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        let limits = ResourceLimits {
            max_memory_mb: self.config.max_memory_mb,
            max_cpu_seconds: self.config.max_cpu_seconds,
            timeout: PROBE_TIMEOUT,
        };

        self.assess_probe(supervisor::supervise("ffprobe", &args, Vec::new(), &limits))
    }

    /// Turn a probe run into a verdict. Only a wall-clock breach (the probe
    /// hung) indicts the input; every other probe failure is tolerated,
    /// including process errors whose stderr happens to mention timeouts.
    fn assess_probe(&self, probe: GwResult<SupervisedOutput>) -> GwResult<()> {
        match probe {
            Ok(result) => {
                if let Some(duration) = probed_duration_seconds(&result.stdout)
                    && duration > self.config.max_duration_seconds as f64
                {
                    return Err(GwError::validation(format!(
                        "audio duration {duration:.0}s exceeds limit of {}s",
                        self.config.max_duration_seconds
                    )));
                }
                Ok(())
            }
            Err(GwError::ResourceLimit {
                breach: LimitBreached::WallClock,
                ..
            }) => Err(GwError::validation(
                "pre-flight probe timed out, potentially malicious file",
            )),
            Err(error) => {
                tracing::debug!(%error, "pre-flight probe failed, continuing");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

/// Argv of the hardened normalization pass: stdin to stdout, bounded
/// probing, corrupt-data discarding, single audio stream out.
#[must_use]
pub(crate) fn build_transcoder_args(config: &SandboxConfig) -> Vec<String> {
    let threads = config.max_threads.to_string();
    let analyze = config.max_analyze_duration_us.to_string();
    let probe = config.max_probe_bytes.to_string();
    let duration = config.max_duration_seconds.to_string();
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-threads",
        threads.as_str(),
        "-analyzeduration",
        analyze.as_str(),
        "-probesize",
        probe.as_str(),
        "-fflags",
        "+discardcorrupt",
        "-err_detect",
        "aggressive",
        "-i",
        "pipe:0",
        "-f",
        "wav",
        "-acodec",
        "pcm_s16le",
        "-ac",
        "1",
        "-ar",
        "16000",
        "-vn",
        "-t",
        duration.as_str(),
        "-threads",
        threads.as_str(),
        "pipe:1",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

/// Extract `format.duration` from ffprobe JSON output.
fn probed_duration_seconds(stdout: &[u8]) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_slice(stdout).ok()?;
    value
        .get("format")?
        .get("duration")?
        .as_str()?
        .parse()
        .ok()
}
