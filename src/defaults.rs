//! Default configuration constants for voxrelay.
//!
//! Shared by the configuration file types and the component config structs so
//! both agree on the same values.

/// Default capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Sample rates the speech boundary detector accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [8000, 16000];

/// Samples per detector frame (32ms at 16kHz).
pub const FRAME_SAMPLES: usize = 512;

/// Speech probability at or above which a frame counts as speech.
pub const SPEECH_THRESHOLD: f32 = 0.5;

/// Margin below the threshold a frame must fall to count as silence.
///
/// Frames between `threshold - hysteresis` and `threshold` keep the current
/// state: they extend an utterance but never end it.
pub const HYSTERESIS: f32 = 0.15;

/// Silence needed after speech before the utterance is emitted.
pub const MIN_SILENCE_MS: u32 = 100;

/// Audio retained while idle and prepended when speech starts.
pub const SPEECH_PAD_MS: u32 = 30;

/// Buffered speech needed before the onset (barge-in) signal fires.
pub const MIN_SPEECH_MS: u32 = 1000;

/// RMS level the energy scorer maps to the speech threshold.
pub const RMS_SPEECH_LEVEL: f32 = 0.02;

/// How often blocking loops wake up to check the stop flag.
pub const POLL_INTERVAL_MS: u64 = 100;

/// Outbound PCM sample width.
pub const BYTES_PER_SAMPLE: u32 = 2;

/// Seconds of audio the paced sender may run ahead of real time.
pub const BUFFER_TIME_SECS: f64 = 0.1;

/// Address the TCP audio transport listens on.
pub const BIND_ADDRESS: &str = "0.0.0.0:12346";

/// System prompt installed at the head of the chat history.
pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Number of user/assistant exchanges kept in the chat history.
pub const CHAT_HISTORY_SIZE: usize = 1;

/// Context key under which each utterance is tagged; its index is the phrase id.
pub const PHRASE_KEY: &str = crate::pipeline::context::keys::RAW_AUDIO;

/// Directory holding the filler clips and their description file.
pub const FILLER_DIR: &str = "filler_data";

/// Description file inside the filler directory.
pub const FILLER_DESCRIPTION: &str = "description.toml";
