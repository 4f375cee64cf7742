//! WAV file input and output for replaying recorded conversations.

use crate::defaults;
use crate::error::{Result, VoxError};
use std::io::Read;
use std::path::Path;

/// Mono 16-bit audio loaded from a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct WavClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl WavClip {
    /// Opens a WAV file, see [`from_reader`](Self::from_reader).
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| VoxError::AudioDecode {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Decodes 16-bit PCM, downmixing stereo to mono.
    ///
    /// Rates the speech detector accepts are kept as-is; anything else is
    /// resampled to the default rate.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoxError::AudioDecode {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(VoxError::AudioDecode {
                message: "WAV file declares zero channels".to_string(),
            });
        }

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxError::AudioDecode {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let channels = spec.channels as usize;
        let mono: Vec<i16> = if channels == 1 {
            raw_samples
        } else {
            raw_samples
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        let (samples, sample_rate) = if defaults::SUPPORTED_SAMPLE_RATES.contains(&spec.sample_rate)
        {
            (mono, spec.sample_rate)
        } else {
            tracing::debug!(
                from = spec.sample_rate,
                to = defaults::SAMPLE_RATE,
                "resampling WAV input"
            );
            (
                resample(&mono, spec.sample_rate, defaults::SAMPLE_RATE),
                defaults::SAMPLE_RATE,
            )
        };

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64
    }

    /// Splits the clip into frames of `frame_samples`; the last one may be shorter.
    pub fn frames(&self, frame_samples: usize) -> impl Iterator<Item = &[i16]> {
        self.samples.chunks(frame_samples.max(1))
    }
}

/// Writes mono 16-bit PCM to `path`.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let to_error = |e: hound::Error| VoxError::AudioDecode {
        message: format!("Failed to write {}: {}", path.display(), e),
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(to_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(to_error)?;
    }
    writer.finalize().map_err(to_error)
}

/// Linear interpolation resampling.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            match samples.get(source_idx + 1) {
                Some(&right) => {
                    let left = samples[source_idx] as f64;
                    (left + (right as f64 - left) * fraction) as i16
                }
                None => samples[source_idx],
            }
        })
        .collect()
}
