//! Text-to-speech stage and audio stream flattening.

use crate::pipeline::context::{ContextChain, Value, keys};
use crate::pipeline::error::StageError;
use crate::pipeline::stage::{Outputs, Stage, empty, failed};
use crate::pipeline::stream::AudioStream;
use crate::tts::synthesizer::Synthesizer;
use std::sync::Arc;
use std::time::Instant;

/// Synthesizes [`keys::ASSISTANT_SENTENCE`].
///
/// Yields one chain carrying an [`AudioStream`] under
/// [`keys::OUTPUT_AUDIO_STREAM`] before synthesis starts, then fills the
/// stream on the same worker and closes it, also when synthesis fails,
/// panics or the outputs are dropped early.
pub struct SynthesisStage<S: Synthesizer> {
    synthesizer: S,
}

impl<S: Synthesizer> SynthesisStage<S> {
    pub fn new(synthesizer: S) -> Self {
        Self { synthesizer }
    }

    fn fill(
        &self,
        stream: &AudioStream,
        sentence: &str,
        language: Option<&str>,
    ) -> Result<usize, StageError> {
        let started = Instant::now();
        let mut chunks = 0;
        for chunk in self.synthesizer.synthesize(sentence, language)? {
            if chunks == 0 {
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "first audio chunk"
                );
            }
            stream
                .put(chunk?)
                .map_err(|e| StageError::Fatal(format!("audio stream: {e}")))?;
            chunks += 1;
        }
        Ok(chunks)
    }
}

impl<S: Synthesizer + 'static> Stage for SynthesisStage<S> {
    type Input = ContextChain;
    type Output = ContextChain;

    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn process(&self, chain: ContextChain) -> Outputs<'_, ContextChain> {
        let sentence = match chain.require::<String>(keys::ASSISTANT_SENTENCE) {
            Ok(sentence) if sentence.trim().is_empty() => return empty(),
            Ok(sentence) => sentence.clone(),
            Err(error) => return failed(error),
        };
        let language = chain.get_as::<String>(keys::LANGUAGE_CODE).cloned();

        let stream = Arc::new(AudioStream::new());
        let shared: Value = stream.clone();
        let output = chain.add_shared(shared, Some(keys::OUTPUT_AUDIO_STREAM));

        let mut pending = Some((CloseOnDrop(stream), sentence, language));
        Box::new(
            std::iter::once(Ok(output)).chain(std::iter::from_fn(move || {
                let (stream, sentence, language) = pending.take()?;
                let result = self.fill(&stream.0, &sentence, language.as_deref());
                drop(stream);
                match result {
                    Ok(chunks) => {
                        tracing::debug!(chunks, "sentence synthesized");
                        None
                    }
                    Err(error) => Some(Err(error)),
                }
            })),
        )
    }
}

/// Closes the stream when dropped, so the consumer is never left waiting
/// for an end marker that will not come.
struct CloseOnDrop(Arc<AudioStream>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Expands every [`keys::OUTPUT_AUDIO_STREAM`] into one chain per chunk
/// under [`keys::OUTPUT_AUDIO_CHUNK`], in stream order.
#[derive(Debug, Default)]
pub struct StreamFlattenStage;

impl Stage for StreamFlattenStage {
    type Input = ContextChain;
    type Output = ContextChain;

    fn name(&self) -> &'static str {
        "stream-flatten"
    }

    fn process(&self, chain: ContextChain) -> Outputs<'_, ContextChain> {
        let Some(stream) = chain.get_arc::<AudioStream>(keys::OUTPUT_AUDIO_STREAM) else {
            return failed(StageError::Validation {
                key: keys::OUTPUT_AUDIO_STREAM.to_string(),
                expected: "AudioStream",
            });
        };
        Box::new(std::iter::from_fn(move || {
            let chunk = stream.next().ok()?;
            Some(Ok(chain.add(chunk, Some(keys::OUTPUT_AUDIO_CHUNK))))
        }))
    }
}
