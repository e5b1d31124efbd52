//! Vosk CLI backend, wrapping `vosk-transcriber`.

use std::time::Duration;

use serde_json::Value;

use crate::error::{GwError, GwResult};
use crate::supervisor::command_exists;

use super::{TranscriptionBackend, config_str, config_timeout, resolve_binary, scratch_wav};

const DEFAULT_BIN: &str = "vosk-transcriber";

pub struct VoskBackend {
    binary: String,
    model_path: Option<String>,
    timeout: Duration,
}

impl VoskBackend {
    #[must_use]
    pub fn new(config: &Value) -> Self {
        Self {
            binary: resolve_binary("STT_VOSK_BIN", config, DEFAULT_BIN),
            model_path: config_str(config, "model_path"),
            timeout: config_timeout(config),
        }
    }

    fn build_args(&self, wav_path: &str, output_path: &str) -> Vec<String> {
        let mut args = vec![
            "-i".to_owned(),
            wav_path.to_owned(),
            "-o".to_owned(),
            output_path.to_owned(),
        ];
        if let Some(model_path) = &self.model_path {
            args.push("--model".to_owned());
            args.push(model_path.clone());
        }
        args
    }
}

impl TranscriptionBackend for VoskBackend {
    fn name(&self) -> &'static str {
        "vosk"
    }

    fn check_availability(&self) -> bool {
        command_exists(&self.binary)
    }

    fn transcribe_raw(&self, samples: &[i16], sample_rate: u32) -> GwResult<String> {
        let (work_dir, wav_path) = scratch_wav(samples, sample_rate)?;
        let output_path = work_dir.path().join("transcript.txt");
        let args = self.build_args(
            &wav_path.to_string_lossy(),
            &output_path.to_string_lossy(),
        );

        super::run_backend_cli(&self.binary, &args, self.timeout).map_err(|error| {
            GwError::TranscriptionFailed {
                backend: "vosk".to_owned(),
                reason: error.to_string(),
            }
        })?;

        let text =
            std::fs::read_to_string(&output_path).map_err(|_| GwError::TranscriptionFailed {
                backend: "vosk".to_owned(),
                reason: "expected transcript artifact was not produced".to_owned(),
            })?;
        Ok(text.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_name_input_and_output() {
        let backend = VoskBackend::new(&Value::Null);
        let args = backend.build_args("/tmp/in.wav", "/tmp/out.txt");
        assert_eq!(args, vec!["-i", "/tmp/in.wav", "-o", "/tmp/out.txt"]);
    }

    #[test]
    fn args_carry_model_path() {
        let config = serde_json::json!({"model_path": "/opt/vosk/model-small"});
        let backend = VoskBackend::new(&config);
        let args = backend.build_args("in.wav", "out.txt");
        assert!(args.join(" ").contains("--model /opt/vosk/model-small"));
    }

    #[test]
    fn binary_override_from_config() {
        let config = serde_json::json!({"binary": "vosk-custom"});
        let backend = VoskBackend::new(&config);
        assert_eq!(backend.binary, "vosk-custom");
    }
}
