use crate::error::{Result, VoxError};
use crate::pipeline::types::Utterance;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Text recognized from one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transcript {
    pub text: String,
    /// Detected language code, when the model reports one.
    pub language: Option<String>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Trait for speech-to-text transcription.
///
/// Implementations wrap a concrete model; the pipeline only sees this trait.
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance.
    fn transcribe(&self, utterance: &Utterance) -> Result<Transcript>;

    /// Name of the loaded model.
    fn model_name(&self) -> &str;

    /// Whether the model is loaded and usable.
    fn is_ready(&self) -> bool;
}

impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, utterance: &Utterance) -> Result<Transcript> {
        (**self).transcribe(utterance)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing.
///
/// Returns queued responses in order, then the default response.
#[derive(Debug)]
pub struct MockTranscriber {
    model_name: String,
    response: Transcript,
    queued: Mutex<VecDeque<Transcript>>,
    latency: Duration,
    should_fail: bool,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: Transcript::new("mock transcription"),
            queued: Mutex::new(VecDeque::new()),
            latency: Duration::ZERO,
            should_fail: false,
        }
    }

    /// Sets the response returned when no queued response is left.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response.text = response.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.response.language = Some(language.to_string());
        self
    }

    /// Queues responses returned one per call before the default one.
    pub fn with_responses<'a>(self, responses: impl IntoIterator<Item = &'a str>) -> Self {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(responses.into_iter().map(Transcript::new));
        self
    }

    /// Sleeps this long in every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, _utterance: &Utterance) -> Result<Transcript> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.should_fail {
            return Err(VoxError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Ok(queued.unwrap_or_else(|| self.response.clone()))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}
