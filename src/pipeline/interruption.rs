//! Barge-in handling: discard queued work that belongs to superseded phrases.

use crate::defaults;
use crate::pipeline::queue::FilteredQueue;
use crate::pipeline::stop::StopFlag;
use crate::pipeline::supervisor::Component;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Announces that every phrase below `phrase_id` is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffNotice {
    pub phrase_id: usize,
}

/// Applies cutoff notices to every registered [`FilteredQueue`].
pub struct InterruptionCoordinator {
    notices: Receiver<CutoffNotice>,
    queues: Vec<Arc<FilteredQueue>>,
    stop: StopFlag,
    poll_interval: Duration,
    last_cutoff: usize,
}

impl InterruptionCoordinator {
    pub fn new(notices: Receiver<CutoffNotice>, stop: StopFlag) -> Self {
        Self {
            notices,
            queues: Vec::new(),
            stop,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            last_cutoff: 0,
        }
    }

    /// Registers a queue to prune.
    pub fn register(&mut self, queue: Arc<FilteredQueue>) {
        self.queues.push(queue);
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Highest cutoff applied so far.
    pub fn last_cutoff(&self) -> usize {
        self.last_cutoff
    }

    /// Applies one notice. Returns the number of evicted entries, or `None`
    /// when the notice does not raise the cutoff.
    pub fn apply(&mut self, notice: CutoffNotice) -> Option<usize> {
        if notice.phrase_id <= self.last_cutoff {
            tracing::debug!(phrase_id = notice.phrase_id, "ignoring stale cutoff notice");
            return None;
        }
        self.last_cutoff = notice.phrase_id;
        let evicted = self
            .queues
            .iter()
            .map(|queue| queue.filter(notice.phrase_id))
            .sum();
        tracing::info!(phrase_id = notice.phrase_id, evicted, "interrupted stale phrases");
        Some(evicted)
    }

    /// Loops until the stop flag is set.
    pub fn run(mut self) {
        let mut disconnected = false;
        while !self.stop.is_set() {
            if disconnected {
                // Nothing can arrive any more; just wait for the stop flag.
                self.stop.wait_timeout(self.poll_interval);
                continue;
            }
            match self.notices.recv_timeout(self.poll_interval) {
                Ok(notice) => {
                    self.apply(notice);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::trace!("no cutoff notice");
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("cutoff notice sender dropped");
                    disconnected = true;
                }
            }
        }
        tracing::debug!(last_cutoff = self.last_cutoff, "interruption coordinator stopped");
    }
}

impl Component for InterruptionCoordinator {
    fn name(&self) -> &str {
        "interruption"
    }

    fn run(self: Box<Self>) {
        InterruptionCoordinator::run(*self)
    }
}
