//! Error types for voxrelay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio errors
    #[error("Unsupported sample rate {rate} Hz (expected 8000 or 16000)")]
    UnsupportedSampleRate { rate: u32 },

    #[error("Audio decoding failed: {message}")]
    AudioDecode { message: String },

    #[error("Speech scoring failed: {message}")]
    SpeechScoring { message: String },

    // Model errors
    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Language model error: {message}")]
    LanguageModel { message: String },

    #[error("Synthesis error: {message}")]
    Synthesis { message: String },

    // Pipeline errors
    #[error("Stage '{stage}' failed to start: {message}")]
    StageSetup { stage: String, message: String },

    #[error("Failed to spawn thread for {component}: {source}")]
    ThreadSpawn {
        component: String,
        #[source]
        source: std::io::Error,
    },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VoxError>;
