//! Duplex voice pipeline that runs from startup until shutdown.

use crate::audio::vad::SpeechProbability;
use crate::config::Config;
use crate::error::{Result, VoxError};
use crate::llm::chat::ChatModel;
use crate::defaults;
use crate::pipeline::error::{ErrorReporter, LogReporter, StageError};
use crate::pipeline::filler_stage::FillerStage;
use crate::pipeline::interruption::InterruptionCoordinator;
use crate::pipeline::language_stage::LanguageModelStage;
use crate::pipeline::queue::{FilteredQueue, Message, Queue, StageQueue};
use crate::pipeline::runner::StageRunner;
use crate::pipeline::speech_stage::SpeechBoundaryStage;
use crate::pipeline::stage::Stage;
use crate::pipeline::stop::StopFlag;
use crate::pipeline::supervisor::{Component, PipelineSupervisor};
use crate::pipeline::synthesis_stage::{StreamFlattenStage, SynthesisStage};
use crate::pipeline::transcription_stage::TranscriptionStage;
use crate::pipeline::types::AudioFrame;
use crate::stt::transcriber::Transcriber;
use crate::transport::{AudioTransport, PacedSender};
use crate::tts::synthesizer::Synthesizer;
use std::sync::Arc;
use std::time::Duration;

/// Audio in, audio out:
/// frames → speech boundary → transcription → (filler) → language model →
/// synthesis → stream flatten → paced sender.
///
/// The optional filler stage sends its clip directly to the queue in front of
/// stream flatten.
///
/// Every queue behind the speech boundary stage is a [`FilteredQueue`]
/// registered with one [`InterruptionCoordinator`], so when the user barges
/// in, replies to earlier phrases are dropped wherever they are queued.
pub struct VoicePipeline {
    config: Config,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl VoicePipeline {
    /// Creates a pipeline with the default error reporter.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Validates the configuration, builds every component and starts them.
    ///
    /// A stage whose setup fails aborts the start: already built components
    /// are never spawned and the error is returned.
    pub fn start<P, T, M, S>(
        self,
        scorer: P,
        transcriber: T,
        chat_model: M,
        synthesizer: S,
        transport: Box<dyn AudioTransport>,
    ) -> Result<PipelineHandle>
    where
        P: SpeechProbability + 'static,
        T: Transcriber + 'static,
        M: ChatModel + 'static,
        S: Synthesizer + 'static,
    {
        let config = self.config;
        config.validate()?;

        let stop = StopFlag::new();
        let poll_interval = config.poll_interval();
        let reporter = self.error_reporter;
        let (notice_tx, notice_rx) = crossbeam_channel::unbounded();

        let frames: Arc<StageQueue<AudioFrame>> = Arc::new(StageQueue::new());
        let utterances = Arc::new(FilteredQueue::new(defaults::PHRASE_KEY));
        let texts = Arc::new(FilteredQueue::new(defaults::PHRASE_KEY));
        let sentences = Arc::new(FilteredQueue::new(defaults::PHRASE_KEY));
        let streams = Arc::new(FilteredQueue::new(defaults::PHRASE_KEY));
        let chunks = Arc::new(FilteredQueue::new(defaults::PHRASE_KEY));
        let prompts = config
            .stages
            .filler_enabled
            .then(|| Arc::new(FilteredQueue::new(defaults::PHRASE_KEY)));

        let mut filtered = vec![utterances.clone(), texts.clone()];
        filtered.extend(prompts.clone());
        filtered.extend([sentences.clone(), streams.clone(), chunks.clone()]);

        let mut coordinator =
            InterruptionCoordinator::new(notice_rx, stop.clone()).with_poll_interval(poll_interval);
        for queue in &filtered {
            coordinator.register(queue.clone());
        }

        let wiring = Wiring {
            stop: &stop,
            reporter: &reporter,
            poll_interval,
        };
        let sample_rate = synthesizer.sample_rate();

        let speech = SpeechBoundaryStage::new(config.detector_config(), scorer, notice_tx)?;
        let speech = wiring.runner(speech, frames.clone(), utterances.clone(), 1)?;
        let transcription = wiring.runner(
            TranscriptionStage::new(transcriber),
            utterances.clone(),
            texts.clone(),
            config.stages.transcription_workers,
        )?;
        let filler = match &prompts {
            Some(prompts) => Some(wiring.runner(
                FillerStage::new(&config.stages.filler_dir, sample_rate, streams.clone()),
                texts.clone(),
                prompts.clone(),
                1,
            )?),
            None => None,
        };
        let language_input: Arc<FilteredQueue> = prompts.unwrap_or_else(|| texts.clone());
        let language = wiring.runner(
            LanguageModelStage::new(
                chat_model,
                &config.language_model.system_prompt,
                config.language_model.history_size,
            ),
            language_input,
            sentences.clone(),
            config.stages.language_model_workers,
        )?;
        let synthesis = wiring.runner(
            SynthesisStage::new(synthesizer),
            sentences.clone(),
            streams.clone(),
            config.stages.synthesis_workers,
        )?;
        let flatten = wiring.runner(
            StreamFlattenStage,
            streams.clone(),
            chunks.clone(),
            config.stages.flatten_workers,
        )?;
        let sender = PacedSender::new(
            chunks.clone(),
            transport,
            config.pacing_config(sample_rate),
            stop.clone(),
        )
        .with_error_reporter(reporter.clone())
        .with_poll_interval(poll_interval);

        let mut supervisor = PipelineSupervisor::new(stop.clone());
        supervisor.add(coordinator);
        supervisor.add(speech);
        supervisor.add(transcription);
        if let Some(filler) = filler {
            supervisor.add(filler);
        }
        supervisor.add(language);
        supervisor.add(synthesis);
        supervisor.add(flatten);
        // The sender is the last consumer; once it is done nothing else
        // can make progress, so it releases the coordinator too.
        supervisor.add(StopOnExit {
            inner: sender,
            stop: stop.clone(),
        });
        supervisor.start()?;

        tracing::info!(
            sample_rate = config.audio.sample_rate,
            output_rate = sample_rate,
            "voice pipeline started"
        );

        Ok(PipelineHandle {
            frames,
            filtered,
            supervisor,
            frame_samples: config.audio.frame_samples,
            next_sequence: 0,
        })
    }
}

/// Shared arguments for building stage runners.
struct Wiring<'a> {
    stop: &'a StopFlag,
    reporter: &'a Arc<dyn ErrorReporter>,
    poll_interval: Duration,
}

impl Wiring<'_> {
    fn runner<S: Stage>(
        &self,
        stage: S,
        input: Arc<dyn Queue<S::Input>>,
        output: Arc<dyn Queue<S::Output>>,
        workers: usize,
    ) -> Result<StageRunner<S>> {
        let name = stage.name();
        let runner = StageRunner::with_error_reporter(
            stage,
            input,
            output,
            self.stop.clone(),
            self.reporter.clone(),
        )
        .map_err(|error| setup_error(name, error))?;
        Ok(runner
            .with_workers(workers)
            .with_poll_interval(self.poll_interval))
    }
}

fn setup_error(stage: &str, error: StageError) -> VoxError {
    VoxError::StageSetup {
        stage: stage.to_string(),
        message: error.to_string(),
    }
}

/// Sets the stop flag once the wrapped component returns.
struct StopOnExit<C: Component> {
    inner: C,
    stop: StopFlag,
}

impl<C: Component> Component for StopOnExit<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run(self: Box<Self>) {
        let StopOnExit { inner, stop } = *self;
        Component::run(Box::new(inner));
        stop.set();
    }
}

/// Handle to a running [`VoicePipeline`].
pub struct PipelineHandle {
    frames: Arc<StageQueue<AudioFrame>>,
    filtered: Vec<Arc<FilteredQueue>>,
    supervisor: PipelineSupervisor,
    frame_samples: usize,
    next_sequence: u64,
}

impl PipelineHandle {
    /// Feeds one frame of microphone samples.
    pub fn push_frame(&mut self, samples: Vec<i16>) {
        let frame = AudioFrame::new(samples, self.next_sequence);
        self.next_sequence += 1;
        self.frames.put(Message::Item(frame));
    }

    /// Splits `samples` into configured frame sizes and feeds them in order.
    /// A short tail becomes its own frame.
    pub fn push_audio(&mut self, samples: &[i16]) {
        for frame in samples.chunks(self.frame_samples.max(1)) {
            self.push_frame(frame.to_vec());
        }
    }

    /// Number of frames fed so far.
    pub fn frames_pushed(&self) -> u64 {
        self.next_sequence
    }

    /// Ends the input: in-flight work drains through every stage and the
    /// sender closes the transport.
    pub fn finish(&self) {
        self.frames.put(Message::Shutdown);
    }

    /// Chains discarded by barge-in filtering so far.
    pub fn dropped(&self) -> u64 {
        self.filtered.iter().map(|queue| queue.dropped()).sum()
    }

    /// Whether a stop was requested, by [`stop`](Self::stop) or by a fatal error.
    pub fn is_stopped(&self) -> bool {
        self.supervisor.stop_flag().is_set()
    }

    /// True while any component thread is alive.
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// The stop flag shared by every component.
    pub fn stop_flag(&self) -> StopFlag {
        self.supervisor.stop_flag().clone()
    }

    /// Aborts the pipeline and waits at most `grace` for the threads.
    /// Returns the number of component threads that panicked.
    pub fn stop(mut self, grace: Duration) -> usize {
        self.supervisor.stop(grace)
    }

    /// Waits until the pipeline finishes on its own, after [`finish`](Self::finish)
    /// or a fatal error. Returns the number of component threads that panicked.
    pub fn wait(mut self) -> usize {
        self.supervisor.wait()
    }
}
