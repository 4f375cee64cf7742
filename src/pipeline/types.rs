//! Audio payloads flowing through the pipeline.

/// A frame of raw microphone audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers, mono).
    pub samples: Vec<i16>,
    /// Sequence number assigned by the producer.
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sequence: u64) -> Self {
        Self { samples, sequence }
    }
}

/// One detected utterance: everything between speech start and sustained silence.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// PCM samples including pre-roll.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Samples converted to `f32` in `[-1.0, 1.0]`.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect()
    }
}
