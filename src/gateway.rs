//! Request orchestration: admission, validation, sandboxed normalization,
//! and backend dispatch, in that order. The gateway owns no policy of its
//! own beyond sequencing; each stage rejects with its own error kind so
//! callers can distinguish throttling from malicious input from backend
//! trouble.

use crate::config::GatewayConfig;
use crate::error::{GwError, GwResult};
use crate::rate_limit::SlidingWindowRateLimiter;
use crate::registry::BackendRegistry;
use crate::sandbox::SandboxExecutor;
use crate::supervisor::ResourceStats;
use crate::validator::{self, AudioMetadata};
use crate::wav;

/// MIME types accepted at the front door. `application/octet-stream` is
/// allowed through because the magic-number check still applies.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/ogg",
    "audio/flac",
    "audio/x-flac",
    "audio/webm",
    "audio/aac",
    "audio/m4a",
    "audio/x-m4a",
    "audio/opus",
    "audio/vorbis",
    "audio/speex",
    "audio/amr",
    "audio/3gpp",
    "audio/3gpp2",
    "application/octet-stream",
];

/// Leading-byte signatures of the accepted audio containers.
const AUDIO_MAGIC_NUMBERS: &[&[u8]] = &[
    b"RIFF",
    b"ID3",
    b"\xff\xfb",
    b"\xff\xf3",
    b"\xff\xf2",
    b"fLaC",
    b"OggS",
    b"\x00\x00\x00\x20ftypM4A",
    b"\x00\x00\x00\x18ftyp",
    b"\x1a\x45\xdf\xa3",
    b"#!AMR",
];

const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub audio: Vec<u8>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub backend: Option<String>,
    pub client_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct GatewayResponse {
    pub text: String,
    pub backend_used: String,
    pub fallback_used: bool,
    pub metadata: AudioMetadata,
    pub sandbox_stats: ResourceStats,
    pub sanitized_filename: Option<String>,
    pub completed_at_rfc3339: String,
}

pub struct Gateway {
    config: GatewayConfig,
    limiter: SlidingWindowRateLimiter,
    sandbox: SandboxExecutor,
    registry: BackendRegistry,
}

impl Gateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let limiter = SlidingWindowRateLimiter::new(
            config.max_requests_per_minute,
            config.max_requests_per_hour,
        );
        let sandbox = SandboxExecutor::new(config.sandbox.clone());
        let mut registry = BackendRegistry::new(&config.default_backend);
        // The end-to-end request timeout bounds the recognition step, by far
        // the longest stage.
        let backend_config = serde_json::json!({"timeout_secs": config.request_timeout_secs});
        for name in registry.known_backends() {
            registry.set_config(&name, backend_config.clone());
        }
        Self {
            config,
            limiter,
            sandbox,
            registry,
        }
    }

    pub fn handle(&self, request: &GatewayRequest) -> GwResult<GatewayResponse> {
        self.limiter
            .is_allowed(&request.client_id)
            .map_err(GwError::admission)?;

        if request.audio.is_empty() {
            return Err(GwError::validation("empty audio payload"));
        }
        if request.audio.len() as u64 > self.config.max_file_size_bytes {
            return Err(GwError::validation(format!(
                "file size {} exceeds limit of {} bytes",
                request.audio.len(),
                self.config.max_file_size_bytes
            )));
        }

        check_mime(request.mime_type.as_deref(), &request.audio)?;

        let verdict = validator::validate(&request.audio);
        if !verdict.valid {
            return Err(GwError::validation(
                verdict.reason.unwrap_or_else(|| "validation failed".to_owned()),
            ));
        }
        let metadata = verdict.metadata;

        let outcome = self.sandbox.normalize(&request.audio, &request.client_id)?;
        let (samples, sample_rate) = wav::parse_mono16(&outcome.output)?;

        let transcription =
            self.registry
                .transcribe(&samples, sample_rate, request.backend.as_deref())?;

        tracing::info!(
            client = %request.client_id,
            backend = %transcription.backend_used,
            fallback = transcription.fallback_used,
            bytes = request.audio.len(),
            "request complete"
        );
        Ok(GatewayResponse {
            text: transcription.text,
            backend_used: transcription.backend_used,
            fallback_used: transcription.fallback_used,
            metadata,
            sandbox_stats: outcome.stats,
            sanitized_filename: request.filename.as_deref().map(sanitize_filename),
            completed_at_rfc3339: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Validation-only entry point: no admission cost, no sandbox run.
    pub fn validate_only(&self, audio: &[u8]) -> validator::ValidationVerdict {
        validator::validate(audio)
    }

    #[must_use]
    pub fn available_backends(&self) -> Vec<String> {
        self.registry.list_available()
    }

    #[must_use]
    pub fn known_backends(&self) -> Vec<String> {
        self.registry.known_backends()
    }
}

/// Declared MIME type must be on the allow-list when present, and the
/// payload must open with a recognized audio signature either way.
fn check_mime(mime_type: Option<&str>, audio: &[u8]) -> GwResult<()> {
    if let Some(mime) = mime_type {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or(mime)
            .trim()
            .to_ascii_lowercase();
        if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(GwError::validation(format!(
                "MIME type not allowed: {mime}"
            )));
        }
    }
    if !has_audio_magic(audio) {
        return Err(GwError::validation(
            "file does not match any known audio format signature",
        ));
    }
    Ok(())
}

fn has_audio_magic(audio: &[u8]) -> bool {
    AUDIO_MAGIC_NUMBERS
        .iter()
        .any(|magic| audio.starts_with(magic))
        // ftyp containers vary in the leading size field.
        || (audio.len() >= 8 && &audio[4..8] == b"ftyp")
}

/// Strip path components and shell-relevant characters from a client
/// supplied filename.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let mut cleaned: String = base
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    while cleaned.starts_with('.') {
        cleaned.remove(0);
    }
    if cleaned.len() > MAX_FILENAME_LEN {
        cleaned.truncate(MAX_FILENAME_LEN);
    }
    if cleaned.is_empty() {
        "unnamed_file".to_owned()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn wav_bytes() -> Vec<u8> {
        wav::write_mono16(&vec![0i16; 16_000], 16_000)
    }

    #[test]
    fn mime_allow_list_accepts_declared_audio() {
        assert!(check_mime(Some("audio/wav"), &wav_bytes()).is_ok());
        assert!(check_mime(Some("AUDIO/WAV"), &wav_bytes()).is_ok());
        assert!(check_mime(Some("audio/ogg; codecs=opus"), b"OggS....").is_ok());
        assert!(check_mime(None, &wav_bytes()).is_ok());
    }

    #[test]
    fn mime_allow_list_rejects_non_audio() {
        let err = check_mime(Some("text/html"), &wav_bytes()).unwrap_err();
        assert!(err.to_string().contains("MIME"), "got: {err}");
    }

    #[test]
    fn magic_number_is_required_even_for_octet_stream() {
        let err = check_mime(Some("application/octet-stream"), b"<?php echo").unwrap_err();
        assert!(err.to_string().contains("signature"), "got: {err}");
    }

    #[test]
    fn ftyp_containers_pass_the_magic_check() {
        let mut m4a = vec![0x00, 0x00, 0x00, 0x1c];
        m4a.extend_from_slice(b"ftypM4A ");
        assert!(has_audio_magic(&m4a));
    }

    #[test]
    fn sanitize_strips_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("/var/tmp/clip.wav"), "clip.wav");
    }

    #[test]
    fn sanitize_removes_shell_characters_and_leading_dots() {
        assert_eq!(sanitize_filename("a;rm -rf$(x).wav"), "arm -rfx.wav");
        assert_eq!(sanitize_filename(".hidden.wav"), "hidden.wav");
        assert_eq!(sanitize_filename("..."), "unnamed_file");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = format!("{}.wav", "a".repeat(400));
        assert_eq!(sanitize_filename(&long).len(), MAX_FILENAME_LEN);
    }

    #[test]
    fn empty_payload_is_rejected_before_any_other_work() {
        let gateway = Gateway::new(GatewayConfig::default());
        let request = GatewayRequest {
            audio: Vec::new(),
            mime_type: None,
            filename: None,
            backend: None,
            client_id: "t".to_owned(),
        };
        let err = gateway.handle(&request).unwrap_err();
        assert!(err.to_string().contains("empty"), "got: {err}");
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let config = GatewayConfig {
            max_file_size_bytes: 1024,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(config);
        let request = GatewayRequest {
            audio: wav_bytes(),
            mime_type: None,
            filename: None,
            backend: None,
            client_id: "t".to_owned(),
        };
        let err = gateway.handle(&request).unwrap_err();
        assert!(matches!(err, GwError::ValidationFailed { .. }));
        assert!(err.to_string().contains("exceeds"), "got: {err}");
    }

    #[test]
    fn rate_limited_client_gets_admission_error() {
        let config = GatewayConfig {
            max_requests_per_minute: 1,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(config);
        let request = GatewayRequest {
            audio: b"%PDF-1.4 not audio".to_vec(),
            mime_type: None,
            filename: None,
            backend: None,
            client_id: "greedy".to_owned(),
        };
        // First request burns the allowance (it fails validation but the
        // admission slot is consumed first).
        let _ = gateway.handle(&request);
        let err = gateway.handle(&request).unwrap_err();
        assert!(matches!(err, GwError::AdmissionRejected { .. }), "got: {err:?}");
    }

    #[test]
    fn embedded_executable_is_rejected_with_validator_reason() {
        let gateway = Gateway::new(GatewayConfig::default());
        let mut audio = wav_bytes();
        let insert_at = audio.len() / 2;
        audio[insert_at..insert_at + 4].copy_from_slice(b"\x7fELF");
        let request = GatewayRequest {
            audio,
            mime_type: Some("audio/wav".to_owned()),
            filename: None,
            backend: None,
            client_id: "t".to_owned(),
        };
        let err = gateway.handle(&request).unwrap_err();
        assert!(matches!(err, GwError::ValidationFailed { .. }));
        assert!(err.to_string().contains("suspicious"), "got: {err}");
    }
}
