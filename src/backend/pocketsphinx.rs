//! PocketSphinx CLI backend.
//!
//! `pocketsphinx single <wav>` prints one JSON object per line; the
//! hypothesis text lives in the `t` field. Non-JSON output from older
//! builds is used verbatim as a fallback.

use std::time::Duration;

use serde_json::Value;

use crate::error::{GwError, GwResult};
use crate::supervisor::command_exists;

use super::{TranscriptionBackend, config_timeout, resolve_binary, scratch_wav};

const DEFAULT_BIN: &str = "pocketsphinx";

pub struct PocketsphinxBackend {
    binary: String,
    timeout: Duration,
}

impl PocketsphinxBackend {
    #[must_use]
    pub fn new(config: &Value) -> Self {
        Self {
            binary: resolve_binary("STT_POCKETSPHINX_BIN", config, DEFAULT_BIN),
            timeout: config_timeout(config),
        }
    }

    fn build_args(&self, wav_path: &str) -> Vec<String> {
        vec!["single".to_owned(), wav_path.to_owned()]
    }
}

impl TranscriptionBackend for PocketsphinxBackend {
    fn name(&self) -> &'static str {
        "pocketsphinx"
    }

    fn check_availability(&self) -> bool {
        command_exists(&self.binary)
    }

    fn transcribe_raw(&self, samples: &[i16], sample_rate: u32) -> GwResult<String> {
        let (_work_dir, wav_path) = scratch_wav(samples, sample_rate)?;
        let args = self.build_args(&wav_path.to_string_lossy());

        let stdout = super::run_backend_cli(&self.binary, &args, self.timeout).map_err(
            |error| GwError::TranscriptionFailed {
                backend: "pocketsphinx".to_owned(),
                reason: error.to_string(),
            },
        )?;

        Ok(parse_hypotheses(&String::from_utf8_lossy(&stdout)))
    }
}

fn parse_hypotheses(stdout: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut saw_json = false;
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            saw_json = true;
            if let Some(text) = value.get("t").and_then(Value::as_str)
                && !text.trim().is_empty()
            {
                parts.push(text.trim().to_owned());
            }
        }
    }
    if saw_json {
        parts.join(" ")
    } else {
        stdout.trim().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_use_single_mode() {
        let backend = PocketsphinxBackend::new(&Value::Null);
        assert_eq!(backend.build_args("/tmp/x.wav"), vec!["single", "/tmp/x.wav"]);
    }

    #[test]
    fn hypotheses_join_json_lines() {
        let stdout = concat!(
            r#"{"b":0.0,"d":1.2,"p":0.9,"t":"hello"}"#,
            "\n",
            r#"{"b":1.2,"d":0.8,"p":0.8,"t":"world"}"#,
            "\n",
        );
        assert_eq!(parse_hypotheses(stdout), "hello world");
    }

    #[test]
    fn empty_hypotheses_yield_empty_string() {
        let stdout = r#"{"b":0.0,"d":1.2,"p":0.9,"t":""}"#;
        assert_eq!(parse_hypotheses(stdout), "");
    }

    #[test]
    fn non_json_output_is_used_verbatim() {
        assert_eq!(parse_hypotheses("  plain hypothesis \n"), "plain hypothesis");
    }
}
