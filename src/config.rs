use crate::audio::vad::SpeechBoundaryConfig;
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::transport::PacingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub detector: DetectorConfig,
    pub stages: StagesConfig,
    pub interruption: InterruptionConfig,
    pub transport: TransportConfig,
    pub language_model: LanguageModelConfig,
}

/// Inbound audio format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per frame handed to the speech detector.
    pub frame_samples: usize,
}

/// Speech boundary detector tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub threshold: f32,
    pub hysteresis: f32,
    pub min_silence_ms: u32,
    pub speech_pad_ms: u32,
    pub min_speech_ms: u32,
    /// RMS level the energy scorer treats as the speech threshold.
    pub rms_speech_level: f32,
}

/// Worker pool sizes and optional stages. The speech boundary and filler
/// stages always run sequentially.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagesConfig {
    pub transcription_workers: usize,
    pub language_model_workers: usize,
    pub synthesis_workers: usize,
    pub flatten_workers: usize,
    /// Play a prerecorded filler before every reply.
    pub filler_enabled: bool,
    /// Directory with the filler description file and clips.
    pub filler_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterruptionConfig {
    /// How often idle loops check the stop flag.
    pub poll_interval_ms: u64,
}

/// Outbound audio transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub bind_address: String,
    pub bytes_per_sample: u32,
    /// Seconds of audio the sender may run ahead of real time.
    pub buffer_time_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LanguageModelConfig {
    pub system_prompt: String,
    /// User/assistant exchanges kept in the chat history.
    pub history_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_samples: defaults::FRAME_SAMPLES,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::SPEECH_THRESHOLD,
            hysteresis: defaults::HYSTERESIS,
            min_silence_ms: defaults::MIN_SILENCE_MS,
            speech_pad_ms: defaults::SPEECH_PAD_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            rms_speech_level: defaults::RMS_SPEECH_LEVEL,
        }
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            transcription_workers: 1,
            language_model_workers: 1,
            synthesis_workers: 1,
            flatten_workers: 1,
            filler_enabled: false,
            filler_dir: PathBuf::from(defaults::FILLER_DIR),
        }
    }
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::BIND_ADDRESS.to_string(),
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
            buffer_time_secs: defaults::BUFFER_TIME_SECS,
        }
    }
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            history_size: defaults::CHAT_HISTORY_SIZE,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> VoxError {
    VoxError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VoxError::ConfigFileNotFound {
                path: path.display().to_string(),
            },
            _ => VoxError::Io(e),
        })?;
        let config: Config = toml::from_str(&contents).map_err(VoxError::from)?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) if matches!(
                e.downcast_ref::<VoxError>(),
                Some(VoxError::ConfigFileNotFound { .. })
            ) =>
            {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXRELAY_BIND → transport.bind_address
    /// - VOXRELAY_SYSTEM_PROMPT → language_model.system_prompt
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("VOXRELAY_BIND")
            && !bind.is_empty()
        {
            self.transport.bind_address = bind;
        }

        if let Ok(prompt) = std::env::var("VOXRELAY_SYSTEM_PROMPT")
            && !prompt.is_empty()
        {
            self.language_model.system_prompt = prompt;
        }

        self
    }

    /// Checks values that would only fail once the pipeline runs.
    pub fn validate(&self) -> Result<()> {
        self.detector_config().validate()?;
        if self.audio.frame_samples == 0 {
            return Err(invalid("audio.frame_samples", "must be positive"));
        }
        if !(self.detector.rms_speech_level > 0.0) {
            return Err(invalid("detector.rms_speech_level", "must be positive"));
        }
        let workers = [
            ("stages.transcription_workers", self.stages.transcription_workers),
            ("stages.language_model_workers", self.stages.language_model_workers),
            ("stages.synthesis_workers", self.stages.synthesis_workers),
            ("stages.flatten_workers", self.stages.flatten_workers),
        ];
        for (key, count) in workers {
            if count == 0 {
                return Err(invalid(key, "at least one worker is required"));
            }
        }
        if self.interruption.poll_interval_ms == 0 {
            return Err(invalid("interruption.poll_interval_ms", "must be positive"));
        }
        if self.transport.bytes_per_sample == 0 {
            return Err(invalid("transport.bytes_per_sample", "must be positive"));
        }
        if !(self.transport.buffer_time_secs.is_finite() && self.transport.buffer_time_secs >= 0.0)
        {
            return Err(invalid(
                "transport.buffer_time_secs",
                format!("must be a non-negative number, got {}", self.transport.buffer_time_secs),
            ));
        }
        Ok(())
    }

    pub fn detector_config(&self) -> SpeechBoundaryConfig {
        SpeechBoundaryConfig {
            sample_rate: self.audio.sample_rate,
            threshold: self.detector.threshold,
            hysteresis: self.detector.hysteresis,
            min_silence_ms: self.detector.min_silence_ms,
            speech_pad_ms: self.detector.speech_pad_ms,
            min_speech_ms: self.detector.min_speech_ms,
        }
    }

    /// Pacing for synthesized audio produced at `sample_rate`.
    pub fn pacing_config(&self, sample_rate: u32) -> PacingConfig {
        PacingConfig {
            sample_rate,
            bytes_per_sample: self.transport.bytes_per_sample,
            buffer_time: Duration::from_secs_f64(self.transport.buffer_time_secs.max(0.0)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.interruption.poll_interval_ms)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxrelay/config.toml on Linux, or a relative
    /// `voxrelay/config.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxrelay")
            .join("config.toml")
    }
}
