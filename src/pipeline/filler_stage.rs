//! Prerecorded filler played while the language model starts its reply.

use crate::audio::wav::{WavClip, resample};
use crate::defaults;
use crate::pipeline::context::{ContextChain, Value, keys};
use crate::pipeline::error::StageError;
use crate::pipeline::queue::{Message, Queue};
use crate::pipeline::stage::{Outputs, Stage, failed, single};
use crate::pipeline::stream::AudioStream;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Contents of the description file:
///
/// ```toml
/// [[filler]]
/// text = "Hmm, let me think."
/// file = "hmm.wav"
/// ```
#[derive(Debug, Deserialize)]
struct FillerDescription {
    #[serde(default)]
    filler: Vec<FillerEntry>,
}

#[derive(Debug, Deserialize)]
struct FillerEntry {
    text: String,
    file: PathBuf,
}

#[derive(Debug)]
struct Filler {
    text: String,
    samples: Vec<i16>,
}

/// Sends a short prerecorded clip straight to the audio queue and passes the
/// chain on with the clip's words under [`keys::START_PHRASE`], so the reply
/// continues from what was already said.
///
/// Clips rotate in description order. Every clip listed in the description
/// file must exist; a missing one fails setup.
pub struct FillerStage {
    dir: PathBuf,
    sample_rate: u32,
    audio: Arc<dyn Queue<ContextChain>>,
    fillers: Vec<Filler>,
    next: AtomicUsize,
}

impl FillerStage {
    /// `audio` receives one chain per filler carrying a closed
    /// [`AudioStream`] at `sample_rate`.
    pub fn new(dir: &Path, sample_rate: u32, audio: Arc<dyn Queue<ContextChain>>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            sample_rate,
            audio,
            fillers: Vec::new(),
            next: AtomicUsize::new(0),
        }
    }

    fn load(&self) -> Result<Vec<Filler>, StageError> {
        let path = self.dir.join(defaults::FILLER_DESCRIPTION);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            StageError::Fatal(format!("cannot read filler description {}: {e}", path.display()))
        })?;
        let description: FillerDescription = toml::from_str(&contents).map_err(|e| {
            StageError::Fatal(format!("invalid filler description {}: {e}", path.display()))
        })?;
        if description.filler.is_empty() {
            return Err(StageError::Fatal(format!(
                "no fillers listed in {}",
                path.display()
            )));
        }

        description
            .filler
            .into_iter()
            .map(|entry| {
                let clip_path = self.dir.join(&entry.file);
                if !clip_path.is_file() {
                    return Err(StageError::Fatal(format!(
                        "missing filler audio {}",
                        clip_path.display()
                    )));
                }
                let clip = WavClip::open(&clip_path)?;
                let samples = resample(&clip.samples, clip.sample_rate, self.sample_rate);
                Ok(Filler {
                    text: entry.text.trim().to_string(),
                    samples,
                })
            })
            .collect()
    }
}

impl Stage for FillerStage {
    type Input = ContextChain;
    type Output = ContextChain;

    fn name(&self) -> &'static str {
        "filler"
    }

    fn setup(&mut self) -> Result<(), StageError> {
        self.fillers = self.load()?;
        tracing::debug!(
            dir = %self.dir.display(),
            fillers = self.fillers.len(),
            "filler clips loaded"
        );
        Ok(())
    }

    fn process(&self, chain: ContextChain) -> Outputs<'_, ContextChain> {
        if self.fillers.is_empty() {
            return failed(StageError::Fatal("filler clips are not loaded".to_string()));
        }
        let filler = &self.fillers[self.next.fetch_add(1, Ordering::Relaxed) % self.fillers.len()];

        let stream = Arc::new(AudioStream::new());
        if !filler.samples.is_empty()
            && let Err(error) = stream.put(filler.samples.clone())
        {
            return failed(StageError::Fatal(format!("audio stream: {error}")));
        }
        stream.close();
        let shared: Value = stream;
        self.audio.put(Message::Item(
            chain.add_shared(shared, Some(keys::OUTPUT_AUDIO_STREAM)),
        ));

        tracing::debug!(
            phrase_id = chain.index_of(keys::RAW_AUDIO),
            text = filler.text.as_str(),
            "filler queued"
        );
        if filler.text.is_empty() {
            single(chain)
        } else {
            single(chain.add(filler.text.clone(), Some(keys::START_PHRASE)))
        }
    }
}
