use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "stt-gateway")]
#[command(about = "Secure admission and execution gateway for untrusted audio transcription")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate, normalize, and transcribe an audio file.
    Transcribe(TranscribeArgs),
    /// Run the attack-pattern validator only and report the verdict.
    Validate(ValidateArgs),
    /// List known backends and which are runnable on this host.
    Backends,
}

#[derive(Debug, Args)]
pub struct TranscribeArgs {
    /// Input audio file.
    pub input: PathBuf,

    /// Backend to try first (falls back to the others on failure).
    #[arg(long)]
    pub backend: Option<String>,

    /// Client identifier used for rate limiting.
    #[arg(long, default_value = "cli")]
    pub client_id: String,

    /// Declared MIME type of the input.
    #[arg(long)]
    pub mime_type: Option<String>,

    /// Emit the full response as pretty JSON instead of plain transcript.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Input audio file.
    pub input: PathBuf,
}
