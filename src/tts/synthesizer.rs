use crate::error::{Result, VoxError};
use std::sync::Arc;
use std::time::Duration;

/// Streamed PCM chunks of synthesized speech.
pub type AudioChunks<'a> = Box<dyn Iterator<Item = Result<Vec<i16>>> + Send + 'a>;

/// Trait for text-to-speech synthesis.
pub trait Synthesizer: Send + Sync {
    /// Starts synthesizing `text`, yielding mono 16-bit chunks at
    /// [`sample_rate`](Synthesizer::sample_rate).
    fn synthesize(&self, text: &str, language: Option<&str>) -> Result<AudioChunks<'_>>;

    fn sample_rate(&self) -> u32;

    fn voice_name(&self) -> &str;
}

impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    fn synthesize(&self, text: &str, language: Option<&str>) -> Result<AudioChunks<'_>> {
        (**self).synthesize(text, language)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn voice_name(&self) -> &str {
        (**self).voice_name()
    }
}

/// Mock synthesizer for testing.
///
/// Produces one chunk per word of `chunk_samples` samples, each filled with
/// the word's length so tests can tell chunks apart.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    chunk_samples: usize,
    sample_rate: u32,
    chunk_latency: Duration,
    should_fail: bool,
}

impl MockSynthesizer {
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            chunk_samples,
            sample_rate: crate::defaults::SAMPLE_RATE,
            chunk_latency: Duration::ZERO,
            should_fail: false,
        }
    }

    /// Sleeps before yielding every chunk.
    pub fn with_chunk_latency(mut self, latency: Duration) -> Self {
        self.chunk_latency = latency;
        self
    }

    /// Yields one chunk, then fails.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str, _language: Option<&str>) -> Result<AudioChunks<'_>> {
        let mut chunks: Vec<Result<Vec<i16>>> = text
            .split_whitespace()
            .map(|word| Ok(vec![word.chars().count() as i16; self.chunk_samples]))
            .collect();
        if self.should_fail {
            chunks.truncate(1);
            chunks.push(Err(VoxError::Synthesis {
                message: "mock synthesis failure".to_string(),
            }));
        }
        let latency = self.chunk_latency;
        Ok(Box::new(chunks.into_iter().map(move |chunk| {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            chunk
        })))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn voice_name(&self) -> &str {
        "mock-voice"
    }
}
