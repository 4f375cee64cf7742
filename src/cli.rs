//! Command-line interface for voxrelay
//!
//! Argument parsing with clap derive macros plus the subcommand bodies that
//! do not need a terminal.

use crate::audio::vad::{RmsProbability, SpeechBoundaryDetector};
use crate::audio::wav::{WavClip, write_wav};
use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Interruptible duplex voice pipeline
#[derive(Parser, Debug)]
#[command(name = "voxrelay", version, about = "Interruptible duplex voice pipeline")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose logging (-v: debug, -vv: trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the effective configuration as TOML
    Config {
        /// Print the configuration file path instead
        #[arg(long)]
        path: bool,
    },
    /// Run the speech boundary detector over a WAV file
    Replay {
        /// WAV file to analyze
        wav: PathBuf,
        /// Write every detected utterance to this directory
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,
    },
    /// Run the full pipeline over a WAV file with canned models and stream
    /// the synthesized audio to one TCP client
    Relay {
        /// WAV file used as microphone input
        wav: PathBuf,
        /// Reply the canned language model gives to every utterance
        #[arg(long, default_value = "I hear you. Go on.")]
        reply: String,
        /// Address to listen on (overrides transport.bind_address)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
}

impl Cli {
    /// Log filter used when RUST_LOG is not set.
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "voxrelay=info",
            1 => "voxrelay=debug",
            _ => "voxrelay=trace",
        }
    }
}

/// Loads the configuration from `custom_path`, or from the default path
/// when it exists, then applies environment overrides.
pub fn load_config(custom_path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// A detected event in a replayed clip, positioned in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    /// The user spoke long enough to interrupt a reply.
    Onset { at_ms: u64 },
    /// An utterance ended.
    Utterance {
        end_ms: u64,
        duration_ms: u64,
        saved: Option<PathBuf>,
    },
}

/// Feeds `clip` frame by frame through a detector scored by signal energy.
pub fn replay(
    clip: &WavClip,
    config: &Config,
    save_dir: Option<&Path>,
) -> anyhow::Result<Vec<ReplayEvent>> {
    let mut detector_config = config.detector_config();
    detector_config.sample_rate = clip.sample_rate;

    let onset = Arc::new(AtomicBool::new(false));
    let listener = onset.clone();
    let mut detector = SpeechBoundaryDetector::new(
        detector_config,
        RmsProbability::new(config.detector.rms_speech_level),
    )?
    .with_onset_listener(move || listener.store(true, Ordering::SeqCst));

    if let Some(dir) = save_dir {
        std::fs::create_dir_all(dir)?;
    }

    let to_ms = |samples: u64| samples * 1000 / clip.sample_rate.max(1) as u64;
    let mut events = Vec::new();
    for frame in clip.frames(config.audio.frame_samples) {
        let utterance = detector.feed(frame)?;
        if onset.swap(false, Ordering::SeqCst) {
            events.push(ReplayEvent::Onset {
                at_ms: to_ms(detector.position()),
            });
        }
        if let Some(utterance) = utterance {
            let saved = match save_dir {
                Some(dir) => {
                    let count = events
                        .iter()
                        .filter(|e| matches!(e, ReplayEvent::Utterance { .. }))
                        .count();
                    let path = dir.join(format!("utterance_{count:03}.wav"));
                    write_wav(&path, &utterance.samples, utterance.sample_rate)?;
                    Some(path)
                }
                None => None,
            };
            events.push(ReplayEvent::Utterance {
                end_ms: to_ms(detector.position()),
                duration_ms: utterance.duration_ms(),
                saved,
            });
        }
    }
    Ok(events)
}
