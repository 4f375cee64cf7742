//! Turns raw microphone frames into tagged utterances.

use crate::audio::vad::{SpeechBoundaryConfig, SpeechBoundaryDetector, SpeechProbability};
use crate::error::Result;
use crate::pipeline::context::{ContextChain, keys};
use crate::pipeline::error::StageError;
use crate::pipeline::interruption::CutoffNotice;
use crate::pipeline::stage::{Outputs, Stage, empty, failed, single};
use crate::pipeline::types::AudioFrame;
use crossbeam_channel::Sender;
use std::sync::{Mutex, PoisonError};

/// Wraps the speech boundary detector.
///
/// Every utterance is added to one root chain under [`keys::RAW_AUDIO`], so
/// its sibling index is the phrase id. When the user keeps speaking long
/// enough, a [`CutoffNotice`] for the upcoming phrase is sent so replies to
/// earlier phrases are dropped. Must run with a single worker.
pub struct SpeechBoundaryStage<P: SpeechProbability> {
    detector: Mutex<SpeechBoundaryDetector<P>>,
    root: ContextChain,
}

impl<P: SpeechProbability> SpeechBoundaryStage<P> {
    pub fn new(
        config: SpeechBoundaryConfig,
        scorer: P,
        notices: Sender<CutoffNotice>,
    ) -> Result<Self> {
        let root = ContextChain::root();
        let phrases = root.clone();
        let detector =
            SpeechBoundaryDetector::new(config, scorer)?.with_onset_listener(move || {
                let notice = CutoffNotice {
                    phrase_id: phrases.next_sibling_index(),
                };
                tracing::info!(phrase_id = notice.phrase_id, "user started speaking");
                if notices.send(notice).is_err() {
                    tracing::debug!("interruption coordinator gone, dropping cutoff notice");
                }
            });
        Ok(Self {
            detector: Mutex::new(detector),
            root,
        })
    }

    /// Number of utterances emitted so far.
    pub fn phrases(&self) -> usize {
        self.root.next_sibling_index()
    }
}

impl<P: SpeechProbability + 'static> Stage for SpeechBoundaryStage<P> {
    type Input = AudioFrame;
    type Output = ContextChain;

    fn name(&self) -> &'static str {
        "speech-boundary"
    }

    fn process(&self, frame: AudioFrame) -> Outputs<'_, ContextChain> {
        let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
        match detector.feed(&frame.samples) {
            Ok(Some(utterance)) => {
                let chain = self.root.add(utterance, Some(keys::RAW_AUDIO));
                tracing::debug!(
                    phrase_id = chain.sibling_index(),
                    sequence = frame.sequence,
                    "utterance tagged"
                );
                single(chain)
            }
            Ok(None) => empty(),
            Err(error) => failed(error.into()),
        }
    }

    fn shutdown(&self) {
        tracing::debug!(phrases = self.phrases(), "speech boundary stage finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::ScriptedProbability;
    use crate::pipeline::types::Utterance;
    use crossbeam_channel::unbounded;

    fn config() -> SpeechBoundaryConfig {
        SpeechBoundaryConfig {
            min_speech_ms: 60,
            speech_pad_ms: 0,
            ..SpeechBoundaryConfig::default()
        }
    }

    /// Speech for `speech` frames, then 4 silent frames (enough to end it).
    fn script(speech: usize) -> Vec<f32> {
        let mut probabilities = vec![0.9; speech];
        probabilities.extend([0.0; 4]);
        probabilities
    }

    fn run(stage: &SpeechBoundaryStage<ScriptedProbability>, frames: usize) -> Vec<ContextChain> {
        (0..frames as u64)
            .flat_map(|i| {
                stage
                    .process(AudioFrame::new(vec![1; 480], i))
                    .map(|r| r.unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn utterances_get_consecutive_phrase_ids() {
        let (tx, _rx) = unbounded();
        let mut probabilities = script(3);
        probabilities.extend(script(2));
        let stage =
            SpeechBoundaryStage::new(config(), ScriptedProbability::new(probabilities), tx)
                .unwrap();

        let chains = run(&stage, 13);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].index_of(keys::RAW_AUDIO), Some(0));
        assert_eq!(chains[1].index_of(keys::RAW_AUDIO), Some(1));
        let first = chains[0].require::<Utterance>(keys::RAW_AUDIO).unwrap();
        assert_eq!(first.samples.len(), 3 * 480);
        assert_eq!(stage.phrases(), 2);
    }

    #[test]
    fn onset_sends_notice_for_upcoming_phrase() {
        let (tx, rx) = unbounded();
        let mut probabilities = script(5);
        probabilities.extend(script(1));
        probabilities.extend(script(5));
        let stage =
            SpeechBoundaryStage::new(config(), ScriptedProbability::new(probabilities), tx)
                .unwrap();

        run(&stage, 23);
        let notices: Vec<CutoffNotice> = rx.try_iter().collect();
        assert_eq!(
            notices,
            vec![CutoffNotice { phrase_id: 0 }, CutoffNotice { phrase_id: 2 }]
        );
    }

    #[test]
    fn unsupported_rate_fails_construction() {
        let (tx, _rx) = unbounded();
        let config = SpeechBoundaryConfig {
            sample_rate: 48000,
            ..config()
        };
        assert!(SpeechBoundaryStage::new(config, ScriptedProbability::default(), tx).is_err());
    }
}
