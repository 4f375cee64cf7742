//! voxrelay - Interruptible duplex voice pipeline
//!
//! Microphone frames in, synthesized speech out, with barge-in that drops
//! replies to phrases the user has already talked over.

// Enforce error handling discipline: library code propagates errors
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod stt;
pub mod transport;
pub mod tts;

// Model seams (speech scoring → transcription → chat → synthesis)
pub use audio::vad::{RmsProbability, SpeechProbability};
pub use llm::chat::ChatModel;
pub use stt::transcriber::Transcriber;
pub use tts::synthesizer::Synthesizer;

// Pipeline
pub use pipeline::orchestrator::{PipelineHandle, VoicePipeline};
pub use transport::{AudioTransport, TcpTransport};

// Error handling
pub use error::{Result, VoxError};

// Config
pub use config::Config;

// Stage framework (for advanced users)
pub use pipeline::context::ContextChain;
pub use pipeline::error::{ErrorReporter, StageError};
pub use pipeline::runner::StageRunner;
pub use pipeline::stage::Stage;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
