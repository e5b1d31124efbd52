//! Environment-driven configuration with bounds-clamped fallback.
//!
//! Every knob has a default and a documented [min, max] band. Values outside
//! the band are clamped (with a warning) rather than aborting startup, so a
//! bad deployment variable degrades to a safe limit instead of downtime.

use serde::Serialize;

/// Immutable snapshot of the sandbox resource limits.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxConfig {
    /// Maximum resident memory of the transcoder process, in MB.
    pub max_memory_mb: u64,
    /// Maximum cumulative CPU time of the transcoder process, in seconds.
    pub max_cpu_seconds: u64,
    /// Wall-clock timeout for a single transcoder invocation, in seconds.
    pub timeout_seconds: u64,
    /// Maximum output (and pre-flight input) size, in MB.
    pub max_output_size_mb: u64,
    /// Maximum declared or probed input duration, in seconds.
    pub max_duration_seconds: u64,
    /// Maximum bytes the transcoder may read while probing the container.
    pub max_probe_bytes: u64,
    /// Maximum microseconds the transcoder may spend analyzing streams.
    pub max_analyze_duration_us: u64,
    /// Thread count handed to the transcoder.
    pub max_threads: u64,
    /// Consecutive failures before the circuit breaker opens.
    pub breaker_threshold: u32,
    /// Seconds the breaker stays open before permitting a trial call.
    pub breaker_reset_secs: u64,
    /// Maximum in-flight requests per client.
    pub max_concurrent_per_client: usize,
    /// Maximum sandbox requests per client per minute.
    pub max_requests_per_minute: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            max_cpu_seconds: 30,
            timeout_seconds: 10,
            max_output_size_mb: 100,
            max_duration_seconds: 600,
            max_probe_bytes: 10_000_000,
            max_analyze_duration_us: 10_000_000,
            max_threads: 1,
            breaker_threshold: 5,
            breaker_reset_secs: 60,
            max_concurrent_per_client: 2,
            max_requests_per_minute: 10,
        }
    }
}

impl SandboxConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_memory_mb: env_u64("STT_SANDBOX_MAX_MEMORY_MB", defaults.max_memory_mb, 64, 8192),
            max_cpu_seconds: env_u64(
                "STT_SANDBOX_MAX_CPU_SECONDS",
                defaults.max_cpu_seconds,
                1,
                600,
            ),
            timeout_seconds: env_u64(
                "STT_SANDBOX_TIMEOUT_SECONDS",
                defaults.timeout_seconds,
                1,
                600,
            ),
            max_output_size_mb: env_u64(
                "STT_SANDBOX_MAX_OUTPUT_SIZE_MB",
                defaults.max_output_size_mb,
                1,
                1024,
            ),
            max_duration_seconds: env_u64(
                "STT_MAX_AUDIO_DURATION",
                defaults.max_duration_seconds,
                10,
                3600,
            ),
            max_probe_bytes: env_u64(
                "STT_SANDBOX_MAX_PROBE_BYTES",
                defaults.max_probe_bytes,
                4096,
                100_000_000,
            ),
            max_analyze_duration_us: env_u64(
                "STT_SANDBOX_MAX_ANALYZE_US",
                defaults.max_analyze_duration_us,
                100_000,
                60_000_000,
            ),
            max_threads: env_u64("STT_SANDBOX_MAX_THREADS", defaults.max_threads, 1, 16),
            breaker_threshold: env_u64(
                "STT_CIRCUIT_BREAKER_THRESHOLD",
                u64::from(defaults.breaker_threshold),
                1,
                100,
            ) as u32,
            breaker_reset_secs: env_u64(
                "STT_CIRCUIT_BREAKER_RESET_TIME",
                defaults.breaker_reset_secs,
                1,
                3600,
            ),
            max_concurrent_per_client: env_u64(
                "STT_MAX_CONCURRENT_PER_CLIENT",
                defaults.max_concurrent_per_client as u64,
                1,
                64,
            ) as usize,
            max_requests_per_minute: env_u64(
                "STT_SANDBOX_MAX_REQUESTS_PER_MINUTE",
                defaults.max_requests_per_minute as u64,
                1,
                10_000,
            ) as usize,
        }
    }
}

/// Gateway-level limits, wrapping a [`SandboxConfig`].
#[derive(Debug, Clone, Serialize)]
pub struct GatewayConfig {
    /// Maximum accepted upload size, in bytes.
    pub max_file_size_bytes: u64,
    /// Inbound rate-limiter ceiling per client per minute.
    pub max_requests_per_minute: usize,
    /// Inbound rate-limiter ceiling per client per hour.
    pub max_requests_per_hour: usize,
    /// End-to-end request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Backend used when a request names none.
    pub default_backend: String,
    pub sandbox: SandboxConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024,
            max_requests_per_minute: 60,
            max_requests_per_hour: 600,
            request_timeout_secs: 60,
            default_backend: "whisper".to_owned(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_file_size_bytes: env_u64(
                "STT_MAX_FILE_SIZE",
                defaults.max_file_size_bytes,
                1024,
                500 * 1024 * 1024,
            ),
            max_requests_per_minute: env_u64(
                "STT_MAX_REQUESTS_PER_MINUTE",
                defaults.max_requests_per_minute as u64,
                1,
                10_000,
            ) as usize,
            max_requests_per_hour: env_u64(
                "STT_MAX_REQUESTS_PER_HOUR",
                defaults.max_requests_per_hour as u64,
                1,
                100_000,
            ) as usize,
            request_timeout_secs: env_u64(
                "STT_REQUEST_TIMEOUT",
                defaults.request_timeout_secs,
                1,
                600,
            ),
            default_backend: std::env::var("STT_DEFAULT_BACKEND")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.default_backend),
            sandbox: SandboxConfig::from_env(),
        }
    }
}

fn env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    clamp_parsed(name, std::env::var(name).ok().as_deref(), default, min, max)
}

/// Parse-and-clamp core of the env surface, separated so the policy is
/// testable without mutating process environment.
fn clamp_parsed(name: &str, raw: Option<&str>, default: u64, min: u64, max: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value < min => {
            tracing::warn!(var = name, value, min, "config value below minimum, clamping");
            min
        }
        Ok(value) if value > max => {
            tracing::warn!(var = name, value, max, "config value above maximum, clamping");
            max
        }
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(var = name, raw, default, "unparseable config value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_value_uses_default() {
        assert_eq!(clamp_parsed("X", None, 512, 64, 8192), 512);
    }

    #[test]
    fn in_band_value_passes_through() {
        assert_eq!(clamp_parsed("X", Some("256"), 512, 64, 8192), 256);
        assert_eq!(clamp_parsed("X", Some(" 64 "), 512, 64, 8192), 64);
        assert_eq!(clamp_parsed("X", Some("8192"), 512, 64, 8192), 8192);
    }

    #[test]
    fn out_of_band_values_clamp_to_nearest_bound() {
        assert_eq!(clamp_parsed("X", Some("1"), 512, 64, 8192), 64);
        assert_eq!(clamp_parsed("X", Some("999999"), 512, 64, 8192), 8192);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        assert_eq!(clamp_parsed("X", Some("lots"), 512, 64, 8192), 512);
        assert_eq!(clamp_parsed("X", Some("-5"), 512, 64, 8192), 512);
        assert_eq!(clamp_parsed("X", Some(""), 512, 64, 8192), 512);
    }

    #[test]
    fn defaults_are_internally_consistent() {
        let config = SandboxConfig::default();
        assert!(config.max_concurrent_per_client <= config.max_requests_per_minute);
        assert!(config.timeout_seconds <= config.max_duration_seconds);

        let gateway = GatewayConfig::default();
        assert!(gateway.max_requests_per_minute <= gateway.max_requests_per_hour);
        assert_eq!(gateway.default_backend, "whisper");
    }
}
