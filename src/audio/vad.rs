//! Speech boundary detection.
//!
//! Splits a stream of scored audio frames into utterances and signals when
//! the user has been speaking long enough to interrupt the assistant. Timing
//! is measured in samples, so results do not depend on wall-clock speed.

use crate::defaults;
use crate::error::{Result, VoxError};
use crate::pipeline::types::Utterance;
use std::collections::VecDeque;

/// Scores a frame of audio with the probability that it contains speech.
pub trait SpeechProbability: Send {
    /// Returns a probability in `[0.0, 1.0]`.
    fn probability(&mut self, samples: &[i16], sample_rate: u32) -> Result<f32>;

    /// Clears any recurrent model state.
    fn reset(&mut self) {}
}

/// Energy-based scorer for use without a neural model.
///
/// Maps the frame RMS linearly so that `speech_level` lands on 0.5 and
/// twice that saturates at 1.0.
#[derive(Debug, Clone, Copy)]
pub struct RmsProbability {
    speech_level: f32,
}

impl RmsProbability {
    pub fn new(speech_level: f32) -> Self {
        Self { speech_level }
    }
}

impl Default for RmsProbability {
    fn default() -> Self {
        Self::new(defaults::RMS_SPEECH_LEVEL)
    }
}

impl SpeechProbability for RmsProbability {
    fn probability(&mut self, samples: &[i16], _sample_rate: u32) -> Result<f32> {
        if self.speech_level <= 0.0 {
            return Err(VoxError::SpeechScoring {
                message: format!("speech level must be positive, got {}", self.speech_level),
            });
        }
        let rms = calculate_rms(samples);
        Ok((rms / (2.0 * self.speech_level)).clamp(0.0, 1.0))
    }
}

/// Scorer that replays a fixed list of probabilities, then a fallback.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbability {
    script: VecDeque<f32>,
    fallback: f32,
}

impl ScriptedProbability {
    pub fn new(script: impl IntoIterator<Item = f32>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: 0.0,
        }
    }

    /// Probability returned once the script is exhausted.
    pub fn with_fallback(mut self, fallback: f32) -> Self {
        self.fallback = fallback;
        self
    }
}

impl SpeechProbability for ScriptedProbability {
    fn probability(&mut self, _samples: &[i16], _sample_rate: u32) -> Result<f32> {
        Ok(self.script.pop_front().unwrap_or(self.fallback))
    }
}

/// Receives the "user started speaking" signal.
pub trait OnsetListener: Send {
    fn speech_onset(&self);
}

impl<F: Fn() + Send> OnsetListener for F {
    fn speech_onset(&self) {
        self()
    }
}

/// Detector tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechBoundaryConfig {
    pub sample_rate: u32,
    /// Probability at or above which a frame is speech.
    pub threshold: f32,
    /// A frame is silence only below `threshold - hysteresis`.
    pub hysteresis: f32,
    pub min_silence_ms: u32,
    /// Pre-roll kept while idle and prepended to the next utterance.
    pub speech_pad_ms: u32,
    /// Buffered speech needed before the onset signal fires.
    pub min_speech_ms: u32,
}

impl Default for SpeechBoundaryConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            threshold: defaults::SPEECH_THRESHOLD,
            hysteresis: defaults::HYSTERESIS,
            min_silence_ms: defaults::MIN_SILENCE_MS,
            speech_pad_ms: defaults::SPEECH_PAD_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
        }
    }
}

impl SpeechBoundaryConfig {
    pub fn validate(&self) -> Result<()> {
        if !defaults::SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(VoxError::UnsupportedSampleRate {
                rate: self.sample_rate,
            });
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(VoxError::ConfigInvalidValue {
                key: "detector.threshold".to_string(),
                message: format!("must be in (0, 1], got {}", self.threshold),
            });
        }
        if !(self.hysteresis >= 0.0 && self.hysteresis < self.threshold) {
            return Err(VoxError::ConfigInvalidValue {
                key: "detector.hysteresis".to_string(),
                message: format!(
                    "must be in [0, threshold), got {} with threshold {}",
                    self.hysteresis, self.threshold
                ),
            });
        }
        Ok(())
    }

    fn samples_for(&self, ms: u32) -> u64 {
        self.sample_rate as u64 * ms as u64 / 1000
    }
}

/// Current state of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech; only pre-roll is kept.
    Idle,
    /// Collecting an utterance, onset not yet signalled.
    Buffering,
    /// Collecting an utterance, onset already signalled.
    Signaled,
}

/// Streaming speech boundary state machine.
pub struct SpeechBoundaryDetector<P: SpeechProbability> {
    config: SpeechBoundaryConfig,
    scorer: P,
    onset: Option<Box<dyn OnsetListener>>,
    state: DetectorState,
    /// Samples fed so far.
    current_sample: u64,
    /// Sample at which probability first fell below the silence floor.
    silence_start: Option<u64>,
    buffer: Vec<i16>,
    /// Samples appended since the trigger, pre-roll excluded.
    speech_samples: u64,
    preroll: VecDeque<i16>,
    pad_samples: usize,
    min_silence_samples: u64,
    min_speech_samples: u64,
}

impl<P: SpeechProbability> SpeechBoundaryDetector<P> {
    /// Creates a detector. Fails on an unsupported sample rate or
    /// inconsistent thresholds.
    pub fn new(config: SpeechBoundaryConfig, scorer: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scorer,
            onset: None,
            state: DetectorState::Idle,
            current_sample: 0,
            silence_start: None,
            buffer: Vec::new(),
            speech_samples: 0,
            preroll: VecDeque::new(),
            pad_samples: config.samples_for(config.speech_pad_ms) as usize,
            min_silence_samples: config.samples_for(config.min_silence_ms),
            min_speech_samples: config.samples_for(config.min_speech_ms),
        })
    }

    /// Installs the listener raised once per utterance on sustained speech.
    pub fn with_onset_listener(mut self, listener: impl OnsetListener + 'static) -> Self {
        self.onset = Some(Box::new(listener));
        self
    }

    pub fn config(&self) -> &SpeechBoundaryConfig {
        &self.config
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Total samples fed so far.
    pub fn position(&self) -> u64 {
        self.current_sample
    }

    /// Scores `samples` and advances the state machine.
    pub fn feed(&mut self, samples: &[i16]) -> Result<Option<Utterance>> {
        let probability = self.scorer.probability(samples, self.config.sample_rate)?;
        Ok(self.feed_scored(samples, probability))
    }

    /// Advances the state machine with an externally computed probability.
    pub fn feed_scored(&mut self, samples: &[i16], probability: f32) -> Option<Utterance> {
        let frame_start = self.current_sample;
        self.current_sample += samples.len() as u64;
        let silence_floor = self.config.threshold - self.config.hysteresis;

        if self.state == DetectorState::Idle {
            if probability >= self.config.threshold {
                self.state = DetectorState::Buffering;
                self.buffer.extend(self.preroll.drain(..));
                self.append(samples);
            } else {
                self.keep_preroll(samples);
            }
            return None;
        }

        if probability < silence_floor {
            let start = *self.silence_start.get_or_insert(frame_start);
            if self.current_sample - start >= self.min_silence_samples {
                return Some(self.emit());
            }
            return None;
        }

        if probability >= self.config.threshold {
            self.silence_start = None;
        }
        self.append(samples);
        None
    }

    /// Drops any buffered speech and returns to idle.
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.silence_start = None;
        self.buffer.clear();
        self.speech_samples = 0;
        self.preroll.clear();
        self.current_sample = 0;
        self.scorer.reset();
    }

    fn append(&mut self, samples: &[i16]) {
        self.buffer.extend_from_slice(samples);
        self.speech_samples += samples.len() as u64;
        if self.state == DetectorState::Buffering && self.speech_samples >= self.min_speech_samples
        {
            self.state = DetectorState::Signaled;
            tracing::debug!(
                position = self.current_sample,
                buffered_ms = self.speech_samples * 1000 / self.config.sample_rate as u64,
                "speech onset"
            );
            if let Some(listener) = &self.onset {
                listener.speech_onset();
            }
        }
    }

    fn keep_preroll(&mut self, samples: &[i16]) {
        if self.pad_samples == 0 {
            return;
        }
        self.preroll.extend(samples.iter().copied());
        let excess = self.preroll.len().saturating_sub(self.pad_samples);
        self.preroll.drain(..excess);
    }

    fn emit(&mut self) -> Utterance {
        let utterance = Utterance::new(std::mem::take(&mut self.buffer), self.config.sample_rate);
        tracing::debug!(
            position = self.current_sample,
            duration_ms = utterance.duration_ms(),
            "utterance complete"
        );
        self.state = DetectorState::Idle;
        self.silence_start = None;
        self.speech_samples = 0;
        utterance
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// Returns a normalized value: 0.0 for silence, ~0.707 for a full-scale
/// sine wave, 1.0 for maximum amplitude.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 30ms at 16kHz.
    const FRAME: usize = 480;

    fn config() -> SpeechBoundaryConfig {
        SpeechBoundaryConfig {
            speech_pad_ms: 0,
            ..SpeechBoundaryConfig::default()
        }
    }

    fn counting_detector(
        config: SpeechBoundaryConfig,
    ) -> (SpeechBoundaryDetector<ScriptedProbability>, Arc<AtomicUsize>) {
        let onsets = Arc::new(AtomicUsize::new(0));
        let counter = onsets.clone();
        let detector = SpeechBoundaryDetector::new(config, ScriptedProbability::default())
            .unwrap()
            .with_onset_listener(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        (detector, onsets)
    }

    fn frame(value: i16) -> Vec<i16> {
        vec![value; FRAME]
    }

    #[test]
    fn test_rms_silence_is_zero() {
        assert_eq!(calculate_rms(&[0; 1000]), 0.0);
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_max_amplitude() {
        let rms = calculate_rms(&[i16::MAX; 1000]);
        assert!((rms - 1.0).abs() < 0.001, "RMS should be ~1.0, got {}", rms);
    }

    #[test]
    fn test_rms_mixed_positive_negative() {
        let mut mixed = vec![1000i16; 500];
        mixed.extend(vec![-1000i16; 500]);
        let rms = calculate_rms(&mixed);
        assert!(rms > 0.025 && rms < 0.035, "RMS should be ~0.0305, got {}", rms);
    }

    #[test]
    fn test_rms_probability_maps_speech_level_to_half() {
        let mut scorer = RmsProbability::new(0.5);
        let p = scorer.probability(&[i16::MAX / 2; 100], 16000).unwrap();
        assert!((p - 0.5).abs() < 0.01, "got {p}");
        assert_eq!(scorer.probability(&[0; 100], 16000).unwrap(), 0.0);
        assert_eq!(scorer.probability(&[i16::MAX; 100], 16000).unwrap(), 1.0);
    }

    #[test]
    fn test_rms_probability_rejects_zero_level() {
        let mut scorer = RmsProbability::new(0.0);
        assert!(matches!(
            scorer.probability(&[0; 10], 16000),
            Err(VoxError::SpeechScoring { .. })
        ));
    }

    #[test]
    fn test_unsupported_sample_rate() {
        for rate in [22050, 44100, 48000] {
            let config = SpeechBoundaryConfig {
                sample_rate: rate,
                ..config()
            };
            assert!(matches!(
                SpeechBoundaryDetector::new(config, RmsProbability::default()),
                Err(VoxError::UnsupportedSampleRate { .. })
            ));
        }
        let narrowband = SpeechBoundaryConfig {
            sample_rate: 8000,
            ..config()
        };
        assert!(SpeechBoundaryDetector::new(narrowband, RmsProbability::default()).is_ok());
    }

    #[test]
    fn test_invalid_hysteresis_rejected() {
        let config = SpeechBoundaryConfig {
            hysteresis: 0.6,
            ..config()
        };
        assert!(matches!(
            config.validate(),
            Err(VoxError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_long_silence_yields_nothing() {
        let (mut detector, onsets) = counting_detector(config());
        // 5000ms of sub-threshold frames.
        for _ in 0..(5000 / 30) {
            assert!(detector.feed_scored(&frame(0), 0.1).is_none());
        }
        assert_eq!(onsets.load(Ordering::SeqCst), 0);
        assert_eq!(detector.state(), DetectorState::Idle);
    }

    #[test]
    fn test_sustained_speech_then_silence() {
        let (mut detector, onsets) = counting_detector(config());

        // 1200ms of speech.
        for i in 0..40 {
            assert!(detector.feed_scored(&frame(i), 0.9).is_none());
        }
        assert_eq!(onsets.load(Ordering::SeqCst), 1);
        assert_eq!(detector.state(), DetectorState::Signaled);

        // 150ms of silence.
        let mut utterances = Vec::new();
        for _ in 0..5 {
            if let Some(utterance) = detector.feed_scored(&frame(-1), 0.1) {
                utterances.push(utterance);
            }
        }
        assert_eq!(utterances.len(), 1);
        let utterance = &utterances[0];
        assert_eq!(utterance.samples.len(), 40 * FRAME);
        assert_eq!(utterance.samples[0], 0);
        assert_eq!(utterance.samples[39 * FRAME], 39);
        assert!(!utterance.samples.contains(&-1));
        assert_eq!(detector.state(), DetectorState::Idle);
        assert_eq!(onsets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_onset_fires_once_per_utterance() {
        let (mut detector, onsets) = counting_detector(SpeechBoundaryConfig {
            min_speech_ms: 90,
            ..config()
        });
        for _ in 0..2 {
            for _ in 0..10 {
                detector.feed_scored(&frame(1), 0.9);
            }
            for _ in 0..4 {
                detector.feed_scored(&frame(0), 0.0);
            }
        }
        assert_eq!(onsets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_short_speech_has_no_onset_but_is_emitted() {
        let (mut detector, onsets) = counting_detector(config());
        for _ in 0..5 {
            detector.feed_scored(&frame(1), 0.9);
        }
        let emitted = (0..4).filter_map(|_| detector.feed_scored(&frame(0), 0.0)).count();
        assert_eq!(emitted, 1);
        assert_eq!(onsets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_speech_before_min_silence_cancels_timer() {
        let (mut detector, _) = counting_detector(config());
        detector.feed_scored(&frame(1), 0.9);
        // 90ms silence, not enough at 100ms minimum.
        for _ in 0..3 {
            assert!(detector.feed_scored(&frame(0), 0.0).is_none());
        }
        detector.feed_scored(&frame(2), 0.9);
        for _ in 0..3 {
            assert!(detector.feed_scored(&frame(0), 0.0).is_none());
        }
        let utterance = detector.feed_scored(&frame(0), 0.0).unwrap();
        assert_eq!(utterance.samples.len(), 2 * FRAME);
    }

    #[test]
    fn test_hysteresis_band_extends_without_touching_timer() {
        let (mut detector, _) = counting_detector(config());
        detector.feed_scored(&frame(1), 0.9);

        // Band frames keep the utterance going indefinitely.
        for _ in 0..10 {
            assert!(detector.feed_scored(&frame(2), 0.4).is_none());
        }
        assert_eq!(detector.state(), DetectorState::Buffering);

        // Silence starts the timer; a band frame does not cancel it.
        detector.feed_scored(&frame(0), 0.1);
        detector.feed_scored(&frame(3), 0.4);
        detector.feed_scored(&frame(0), 0.1);
        let utterance = detector.feed_scored(&frame(0), 0.1).unwrap();
        assert_eq!(utterance.samples.len(), 12 * FRAME);
        assert_eq!(*utterance.samples.last().unwrap(), 3);
    }

    #[test]
    fn test_preroll_is_prepended() {
        let (mut detector, _) = counting_detector(SpeechBoundaryConfig {
            speech_pad_ms: 30,
            ..config()
        });
        detector.feed_scored(&frame(7), 0.0);
        detector.feed_scored(&frame(8), 0.0);
        detector.feed_scored(&frame(9), 0.9);
        let utterance = (0..4)
            .find_map(|_| detector.feed_scored(&frame(0), 0.0))
            .unwrap();
        assert_eq!(utterance.samples.len(), 2 * FRAME);
        assert_eq!(utterance.samples[0], 8);
        assert_eq!(utterance.samples[FRAME], 9);
    }

    #[test]
    fn test_feed_uses_scorer() {
        let scorer = ScriptedProbability::new([0.9, 0.9]).with_fallback(0.0);
        let mut detector = SpeechBoundaryDetector::new(config(), scorer).unwrap();
        let mut emitted = None;
        for _ in 0..6 {
            if let Some(utterance) = detector.feed(&frame(5)).unwrap() {
                emitted = Some(utterance);
            }
        }
        assert_eq!(emitted.unwrap().samples.len(), 2 * FRAME);
        assert_eq!(detector.position(), 6 * FRAME as u64);
    }

    #[test]
    fn test_reset_drops_buffer() {
        let (mut detector, _) = counting_detector(config());
        detector.feed_scored(&frame(1), 0.9);
        detector.reset();
        assert_eq!(detector.state(), DetectorState::Idle);
        assert!((0..10).all(|_| detector.feed_scored(&frame(0), 0.0).is_none()));
    }
}
