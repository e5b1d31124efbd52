#![forbid(unsafe_code)]

pub mod backend;
pub mod breaker;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod rate_limit;
pub mod registry;
pub mod sandbox;
pub mod supervisor;
pub mod validator;
pub mod wav;

pub use config::{GatewayConfig, SandboxConfig};
pub use error::{GwError, GwResult};
pub use gateway::{Gateway, GatewayRequest, GatewayResponse};
pub use registry::{BackendRegistry, TranscriptionOutcome};
pub use validator::{AudioMetadata, ValidationVerdict};
