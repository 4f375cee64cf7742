//! Language model stage: streams a reply sentence by sentence.

use crate::llm::chat::{ChatHistory, ChatMessage, ChatModel, TextDeltas};
use crate::llm::sentences::SentenceSplitter;
use crate::pipeline::context::{ContextChain, keys};
use crate::pipeline::error::StageError;
use crate::pipeline::stage::{Outputs, Stage, failed};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Reads [`keys::RECOGNIZED_TEXT`] (and an optional [`keys::START_PHRASE`]
/// the reply must continue from) and yields one chain per sentence under
/// [`keys::ASSISTANT_SENTENCE`] as soon as the sentence is complete.
///
/// The finished exchange is appended to a bounded chat history. Run it with
/// a single worker so replies see the previous exchange.
pub struct LanguageModelStage<M: ChatModel> {
    model: M,
    history: Mutex<ChatHistory>,
}

impl<M: ChatModel> LanguageModelStage<M> {
    pub fn new(model: M, system_prompt: &str, history_size: usize) -> Self {
        Self {
            model,
            history: Mutex::new(ChatHistory::new(Some(system_prompt), history_size)),
        }
    }

    /// Snapshot of the current history as it would be sent to the model.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prompt(&[])
    }

    fn start_reply(&self, chain: ContextChain) -> Result<ReplySentences<'_>, StageError> {
        let text = chain.require::<String>(keys::RECOGNIZED_TEXT)?.clone();
        let start_phrase = chain
            .get_as::<String>(keys::START_PHRASE)
            .filter(|phrase| !phrase.is_empty())
            .cloned();

        let mut extra = vec![ChatMessage::user(text.clone())];
        if let Some(phrase) = &start_phrase {
            extra.push(ChatMessage::assistant(phrase.clone()));
        }
        let messages = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prompt(&extra);

        tracing::debug!(
            phrase_id = chain.index_of(keys::RAW_AUDIO),
            model = self.model.model_name(),
            messages = messages.len(),
            "requesting reply"
        );
        let deltas = self.model.stream_reply(&messages)?;
        Ok(ReplySentences {
            history: &self.history,
            chain,
            deltas,
            splitter: SentenceSplitter::new(),
            ready: VecDeque::new(),
            user: text,
            start_phrase,
            reply: String::new(),
            started: Instant::now(),
            sentences: 0,
            done: false,
        })
    }
}

impl<M: ChatModel + 'static> Stage for LanguageModelStage<M> {
    type Input = ContextChain;
    type Output = ContextChain;

    fn name(&self) -> &'static str {
        "language-model"
    }

    fn process(&self, chain: ContextChain) -> Outputs<'_, ContextChain> {
        match self.start_reply(chain) {
            Ok(sentences) => Box::new(sentences),
            Err(error) => failed(error),
        }
    }
}

/// Lazily pulls deltas and yields completed sentences.
struct ReplySentences<'a> {
    history: &'a Mutex<ChatHistory>,
    chain: ContextChain,
    deltas: TextDeltas<'a>,
    splitter: SentenceSplitter,
    ready: VecDeque<String>,
    user: String,
    start_phrase: Option<String>,
    /// Generated text so far.
    reply: String,
    started: Instant,
    sentences: usize,
    done: bool,
}

impl ReplySentences<'_> {
    fn finish(&mut self) {
        self.ready.extend(self.splitter.finish());
        tracing::debug!(
            phrase_id = self.chain.index_of(keys::RAW_AUDIO),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "reply complete"
        );
        let reply = match self.start_phrase.take() {
            Some(phrase) => format!("{} {}", phrase.trim(), self.reply.trim()),
            None => self.reply.trim().to_string(),
        };
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(
                ChatMessage::user(std::mem::take(&mut self.user)),
                ChatMessage::assistant(reply),
            );
    }
}

impl Iterator for ReplySentences<'_> {
    type Item = Result<ContextChain, StageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sentence) = self.ready.pop_front() {
                if self.sentences == 0 {
                    tracing::debug!(
                        elapsed_ms = self.started.elapsed().as_millis() as u64,
                        "first sentence"
                    );
                }
                self.sentences += 1;
                tracing::info!("ASSISTANT: {sentence}");
                return Some(Ok(self.chain.add(sentence, Some(keys::ASSISTANT_SENTENCE))));
            }
            if self.done {
                return None;
            }
            match self.deltas.next() {
                Some(Ok(delta)) => {
                    self.reply.push_str(&delta);
                    let completed = self.splitter.push(&delta);
                    self.ready.extend(completed);
                }
                Some(Err(error)) => {
                    self.done = true;
                    return Some(Err(error.into()));
                }
                None => {
                    self.done = true;
                    self.finish();
                }
            }
        }
    }
}
