//! Interruptible duplex voice pipeline.
//!
//! Each stage runs behind a [`StageRunner`] on its own thread, fans work out
//! to a worker pool and still emits results in input order. Stages are
//! connected by unbounded queues carrying [`ContextChain`]s; the queues
//! behind the speech boundary stage drop chains of superseded phrases when
//! the user barges in.

pub mod context;
pub mod error;
pub mod filler_stage;
pub mod interruption;
pub mod language_stage;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod speech_stage;
pub mod stage;
pub mod stop;
pub mod stream;
pub mod supervisor;
pub mod synthesis_stage;
pub mod transcription_stage;
pub mod types;

pub use context::{ContextChain, Value, keys};
pub use error::{ErrorReporter, LogReporter, StageError};
pub use filler_stage::FillerStage;
pub use interruption::{CutoffNotice, InterruptionCoordinator};
pub use language_stage::LanguageModelStage;
pub use orchestrator::{PipelineHandle, VoicePipeline};
pub use pool::WorkerPool;
pub use queue::{FilteredQueue, Message, Queue, StageQueue};
pub use runner::StageRunner;
pub use speech_stage::SpeechBoundaryStage;
pub use stage::{FnStage, Outputs, Stage};
pub use stop::StopFlag;
pub use stream::{AudioStream, StreamError, StreamHandle};
pub use supervisor::{Component, PipelineSupervisor};
pub use synthesis_stage::{StreamFlattenStage, SynthesisStage};
pub use transcription_stage::TranscriptionStage;
pub use types::{AudioFrame, Utterance};
