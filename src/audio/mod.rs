//! Audio analysis and file I/O.

pub mod vad;
pub mod wav;

pub use vad::{
    DetectorState, OnsetListener, RmsProbability, ScriptedProbability, SpeechBoundaryConfig,
    SpeechBoundaryDetector, SpeechProbability, calculate_rms,
};
pub use wav::{WavClip, write_wav};
