//! Tracing subscriber setup for the gateway binary.
//!
//! Library callers embed `stt_gateway` into their own subscriber; this
//! module only serves `main`. Filtering follows `RUST_LOG` (defaulting to
//! info for this crate), output goes to stderr so transcript text on
//! stdout stays machine-readable, and `RUST_LOG_FORMAT=json` switches the
//! event format for log shippers.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "stt_gateway=info";

/// Install the global subscriber. Idempotent: a second call loses to the
/// first and is silently ignored, which keeps tests that share a process
/// from panicking.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json_output_requested(std::env::var("RUST_LOG_FORMAT").ok().as_deref()) {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

/// Whether the format toggle asks for JSON events. Anything other than a
/// case-insensitive `json` means human-readable output.
fn json_output_requested(format: Option<&str>) -> bool {
    format.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}
