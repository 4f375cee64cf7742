//! Speech-to-text stage.

use crate::pipeline::context::{ContextChain, keys};
use crate::pipeline::error::StageError;
use crate::pipeline::stage::{Outputs, Stage, empty, failed, single};
use crate::pipeline::types::Utterance;
use crate::stt::transcriber::Transcriber;

/// Reads [`keys::RAW_AUDIO`] and adds [`keys::RECOGNIZED_TEXT`] plus, when
/// the model reports one, [`keys::LANGUAGE_CODE`]. Blank transcripts
/// produce no output.
pub struct TranscriptionStage<T: Transcriber> {
    transcriber: T,
}

impl<T: Transcriber> TranscriptionStage<T> {
    pub fn new(transcriber: T) -> Self {
        Self { transcriber }
    }

    fn transcribe(&self, chain: &ContextChain) -> Result<Option<ContextChain>, StageError> {
        let utterance = chain.require::<Utterance>(keys::RAW_AUDIO)?;
        let transcript = self.transcriber.transcribe(utterance)?;
        let text = transcript.text.trim();
        if text.is_empty() {
            tracing::debug!(
                phrase_id = chain.index_of(keys::RAW_AUDIO),
                "blank transcript, skipping"
            );
            return Ok(None);
        }

        tracing::info!(
            phrase_id = chain.index_of(keys::RAW_AUDIO),
            language = transcript.language.as_deref().unwrap_or("?"),
            "USER: {text}"
        );
        let mut next = chain.add(text.to_string(), Some(keys::RECOGNIZED_TEXT));
        if let Some(language) = transcript.language {
            next = next.add(language, Some(keys::LANGUAGE_CODE));
        }
        Ok(Some(next))
    }
}

impl<T: Transcriber + 'static> Stage for TranscriptionStage<T> {
    type Input = ContextChain;
    type Output = ContextChain;

    fn name(&self) -> &'static str {
        "transcription"
    }

    fn setup(&mut self) -> Result<(), StageError> {
        if !self.transcriber.is_ready() {
            return Err(StageError::Fatal(format!(
                "transcription model '{}' is not ready",
                self.transcriber.model_name()
            )));
        }
        Ok(())
    }

    fn process(&self, chain: ContextChain) -> Outputs<'_, ContextChain> {
        match self.transcribe(&chain) {
            Ok(Some(next)) => single(next),
            Ok(None) => empty(),
            Err(error) => failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::transcriber::MockTranscriber;

    fn phrase() -> ContextChain {
        ContextChain::root().add(Utterance::new(vec![0; 160], 16000), Some(keys::RAW_AUDIO))
    }

    fn outputs(stage: &TranscriptionStage<MockTranscriber>, chain: ContextChain) -> Vec<ContextChain> {
        stage.process(chain).map(|r| r.unwrap()).collect()
    }

    #[test]
    fn adds_text_and_language() {
        let stage = TranscriptionStage::new(
            MockTranscriber::new("m")
                .with_response("  what time is it ")
                .with_language("en"),
        );
        let out = outputs(&stage, phrase());
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].get_as::<String>(keys::RECOGNIZED_TEXT).unwrap(),
            "what time is it"
        );
        assert_eq!(out[0].get_as::<String>(keys::LANGUAGE_CODE).unwrap(), "en");
        assert_eq!(out[0].index_of(keys::RAW_AUDIO), Some(0));
    }

    #[test]
    fn blank_transcript_yields_nothing() {
        let stage = TranscriptionStage::new(MockTranscriber::new("m").with_response("   "));
        assert!(outputs(&stage, phrase()).is_empty());
    }

    #[test]
    fn missing_audio_is_a_validation_error() {
        let stage = TranscriptionStage::new(MockTranscriber::new("m"));
        let results: Vec<_> = stage.process(ContextChain::root().add(1u8, Some("x"))).collect();
        assert!(matches!(
            results.as_slice(),
            [Err(StageError::Validation { .. })]
        ));
    }

    #[test]
    fn model_failure_is_fatal() {
        let stage = TranscriptionStage::new(MockTranscriber::new("m").with_failure());
        let results: Vec<_> = stage.process(phrase()).collect();
        assert!(matches!(results.as_slice(), [Err(StageError::Fatal(_))]));
    }

    #[test]
    fn setup_rejects_unready_model() {
        let mut stage = TranscriptionStage::new(MockTranscriber::new("m").with_failure());
        assert!(matches!(stage.setup(), Err(StageError::Fatal(_))));
    }
}
