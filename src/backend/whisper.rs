//! whisper.cpp CLI backend.
//!
//! Runs `whisper-cli` against the scratch WAV with JSON output enabled and
//! reads the transcript from the emitted `.json` artifact.

use std::time::Duration;

use serde_json::Value;

use crate::error::{GwError, GwResult};
use crate::supervisor::command_exists;

use super::{TranscriptionBackend, config_str, config_timeout, resolve_binary, scratch_wav};

const DEFAULT_BIN: &str = "whisper-cli";

pub struct WhisperBackend {
    binary: String,
    model: Option<String>,
    language: Option<String>,
    timeout: Duration,
}

impl WhisperBackend {
    #[must_use]
    pub fn new(config: &Value) -> Self {
        Self {
            binary: resolve_binary("STT_WHISPER_BIN", config, DEFAULT_BIN),
            model: config_str(config, "model"),
            language: config_str(config, "language"),
            timeout: config_timeout(config),
        }
    }

    fn build_args(&self, wav_path: &str, output_prefix: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_owned(),
            wav_path.to_owned(),
            "-of".to_owned(),
            output_prefix.to_owned(),
            "-oj".to_owned(),
        ];
        if let Some(model) = &self.model {
            args.push("-m".to_owned());
            args.push(model.clone());
        }
        if let Some(language) = &self.language {
            args.push("-l".to_owned());
            args.push(language.clone());
        }
        args
    }
}

impl TranscriptionBackend for WhisperBackend {
    fn name(&self) -> &'static str {
        "whisper"
    }

    fn check_availability(&self) -> bool {
        command_exists(&self.binary)
    }

    fn transcribe_raw(&self, samples: &[i16], sample_rate: u32) -> GwResult<String> {
        let (work_dir, wav_path) = scratch_wav(samples, sample_rate)?;
        let output_prefix = work_dir.path().join("output");
        let args = self.build_args(
            &wav_path.to_string_lossy(),
            &output_prefix.to_string_lossy(),
        );

        super::run_backend_cli(&self.binary, &args, self.timeout).map_err(|error| {
            GwError::TranscriptionFailed {
                backend: "whisper".to_owned(),
                reason: error.to_string(),
            }
        })?;

        let json_path = work_dir.path().join("output.json");
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&json_path).map_err(
            |_| GwError::TranscriptionFailed {
                backend: "whisper".to_owned(),
                reason: "expected JSON artifact was not produced".to_owned(),
            },
        )?)?;

        Ok(extract_transcript(&raw))
    }
}

/// Top-level `text` when present, otherwise the concatenated segment texts
/// under `transcription`.
fn extract_transcript(raw: &Value) -> String {
    if let Some(text) = raw.get("text").and_then(Value::as_str)
        && !text.trim().is_empty()
    {
        return text.trim().to_owned();
    }
    raw.get("transcription")
        .and_then(Value::as_array)
        .map(|segments| {
            segments
                .iter()
                .filter_map(|seg| seg.get("text").and_then(Value::as_str))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}
