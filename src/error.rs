use thiserror::Error;

pub type GwResult<T> = Result<T, GwError>;

#[derive(Debug, Error)]
pub enum GwError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("admission rejected: {reason}")]
    AdmissionRejected { reason: String },

    #[error("transcoder temporarily unavailable; retry after {retry_after_secs}s")]
    SandboxUnavailable { retry_after_secs: u64 },

    #[error("transcoder process failed: {reason}")]
    ProcessFailed { reason: String },

    #[error("resource limit exceeded: {reason}")]
    ResourceLimit {
        breach: crate::supervisor::LimitBreached,
        reason: String,
    },

    #[error("backend `{backend}` not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("transcription failed on `{backend}`: {reason}")]
    TranscriptionFailed { backend: String, reason: String },

    #[error("all backends failed: {}", format_attempts(.attempts))]
    AllBackendsFailed { attempts: Vec<(String, String)> },
}

fn format_attempts(attempts: &[(String, String)]) -> String {
    attempts
        .iter()
        .map(|(backend, reason)| format!("{backend}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl GwError {
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn admission(reason: impl Into<String>) -> Self {
        Self::AdmissionRejected {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn process(reason: impl Into<String>) -> Self {
        Self::ProcessFailed {
            reason: reason.into(),
        }
    }

    /// Build a `ProcessFailed` from a non-zero subprocess exit, folding
    /// trimmed stderr into the reason when present.
    #[must_use]
    pub fn from_process_exit(command: &str, status: i32, stderr: &str) -> Self {
        let trimmed = stderr.trim();
        let reason = if trimmed.is_empty() {
            format!("`{command}` exited with status {status}")
        } else {
            format!("`{command}` exited with status {status}; stderr: {trimmed}")
        };
        Self::ProcessFailed { reason }
    }

    /// Whether the registry may retry this failure on another backend.
    ///
    /// Only inference failures are retried. Validation failures indict the
    /// input, not the backend; a construction failure surfaces as
    /// `BackendNotAvailable` so the caller can distinguish a missing
    /// backend from a bad request.
    #[must_use]
    pub const fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::TranscriptionFailed { .. })
    }

    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "GW-IO",
            Self::Json(_) => "GW-JSON",
            Self::CommandMissing { .. } => "GW-CMD-MISSING",
            Self::ValidationFailed { .. } => "GW-VALIDATION",
            Self::AdmissionRejected { .. } => "GW-ADMISSION",
            Self::SandboxUnavailable { .. } => "GW-SANDBOX-OPEN",
            Self::ProcessFailed { .. } => "GW-PROCESS",
            Self::ResourceLimit { .. } => "GW-RESOURCE-LIMIT",
            Self::BackendNotAvailable { .. } => "GW-BACKEND-UNAVAILABLE",
            Self::TranscriptionFailed { .. } => "GW-TRANSCRIPTION",
            Self::AllBackendsFailed { .. } => "GW-ALL-BACKENDS",
        }
    }
}
