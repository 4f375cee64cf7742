//! Queues connecting pipeline components.
//!
//! Every queue is unbounded and carries either a payload or the shutdown
//! sentinel. [`FilteredQueue`] additionally drops context chains that belong
//! to a phrase older than its cutoff, which is how barge-in discards stale
//! replies.

use crate::pipeline::context::ContextChain;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A queue entry: a payload or the shutdown sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<T> {
    Item(T),
    /// Asks the consumer to finish in-flight work, forward the sentinel and stop.
    Shutdown,
}

impl<T> Message<T> {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Message::Shutdown)
    }
}

/// Unbounded blocking FIFO shared between a producer and a consumer thread.
pub trait Queue<T>: Send + Sync {
    /// Enqueues a message. Never blocks.
    fn put(&self, message: Message<T>);

    /// Waits up to `timeout` for a message.
    fn get_timeout(&self, timeout: Duration) -> Option<Message<T>>;

    /// Blocks until a message is available.
    fn get(&self) -> Message<T>;

    /// Number of buffered messages.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain FIFO backed by a crossbeam channel.
pub struct StageQueue<T> {
    tx: Sender<Message<T>>,
    rx: Receiver<Message<T>>,
}

impl<T> StageQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl<T> Default for StageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Queue<T> for StageQueue<T> {
    fn put(&self, message: Message<T>) {
        // Both ends live in `self`; sending cannot fail.
        self.tx.send(message).ok();
    }

    fn get_timeout(&self, timeout: Duration) -> Option<Message<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Message::Shutdown),
        }
    }

    fn get(&self) -> Message<T> {
        self.rx.recv().unwrap_or(Message::Shutdown)
    }

    fn len(&self) -> usize {
        self.rx.len()
    }
}

struct FilterState {
    items: VecDeque<Message<ContextChain>>,
    cutoff: usize,
}

/// FIFO of context chains that rejects and evicts entries of stale phrases.
///
/// A chain is stale when `index_of(phrase_key)` is below the cutoff. Chains
/// without the phrase key and the shutdown sentinel are never filtered.
pub struct FilteredQueue {
    phrase_key: &'static str,
    state: Mutex<FilterState>,
    available: Condvar,
    dropped: AtomicU64,
}

impl FilteredQueue {
    /// Creates a queue that reads phrase ids from `phrase_key`.
    pub fn new(phrase_key: &'static str) -> Self {
        Self {
            phrase_key,
            state: Mutex::new(FilterState {
                items: VecDeque::new(),
                cutoff: 0,
            }),
            available: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FilterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, message: &Message<ContextChain>, cutoff: usize) -> bool {
        match message {
            Message::Item(chain) => chain
                .index_of(self.phrase_key)
                .is_some_and(|phrase| phrase < cutoff),
            Message::Shutdown => false,
        }
    }

    /// Raises the cutoff to `cutoff` and evicts buffered chains below it.
    ///
    /// A lower cutoff than the current one is ignored. Returns the number of
    /// evicted chains.
    pub fn filter(&self, cutoff: usize) -> usize {
        let mut state = self.lock();
        if cutoff <= state.cutoff {
            return 0;
        }
        state.cutoff = cutoff;
        let before = state.items.len();
        let items = std::mem::take(&mut state.items);
        state.items = items
            .into_iter()
            .filter(|message| !self.is_stale(message, cutoff))
            .collect();
        let evicted = before - state.items.len();
        self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Current cutoff.
    pub fn cutoff(&self) -> usize {
        self.lock().cutoff
    }

    /// Chains rejected on `put` or evicted by `filter` so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Phrase ids of the buffered chains, front first.
    pub fn phrase_ids(&self) -> Vec<Option<usize>> {
        self.lock()
            .items
            .iter()
            .filter_map(|message| match message {
                Message::Item(chain) => Some(chain.index_of(self.phrase_key)),
                Message::Shutdown => None,
            })
            .collect()
    }
}

impl Queue<ContextChain> for FilteredQueue {
    fn put(&self, message: Message<ContextChain>) {
        let mut state = self.lock();
        if self.is_stale(&message, state.cutoff) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        state.items.push_back(message);
        drop(state);
        self.available.notify_one();
    }

    fn get_timeout(&self, timeout: Duration) -> Option<Message<ContextChain>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(message) = state.items.pop_front() {
                return Some(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn get(&self) -> Message<ContextChain> {
        let mut state = self.lock();
        loop {
            if let Some(message) = state.items.pop_front() {
                return message;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn len(&self) -> usize {
        self.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::keys::RAW_AUDIO;
    use std::sync::Arc;
    use std::thread;

    fn phrases(count: usize) -> Vec<ContextChain> {
        let root = ContextChain::root();
        (0..count)
            .map(|i| root.add(i, Some(RAW_AUDIO)).add(format!("text {i}"), Some("text")))
            .collect()
    }

    #[test]
    fn test_stage_queue_is_fifo() {
        let queue = StageQueue::new();
        queue.put(Message::Item(1));
        queue.put(Message::Item(2));
        queue.put(Message::Shutdown);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get(), Message::Item(1));
        assert_eq!(queue.get(), Message::Item(2));
        assert!(queue.get().is_shutdown());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stage_queue_timeout_when_empty() {
        let queue: StageQueue<u8> = StageQueue::new();
        assert!(queue.get_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_filter_evicts_older_phrases() {
        let queue = FilteredQueue::new(RAW_AUDIO);
        for chain in phrases(4) {
            queue.put(Message::Item(chain));
        }
        assert_eq!(queue.phrase_ids(), vec![Some(0), Some(1), Some(2), Some(3)]);

        let evicted = queue.filter(2);
        assert_eq!(evicted, 2);
        assert_eq!(queue.phrase_ids(), vec![Some(2), Some(3)]);
        assert_eq!(queue.cutoff(), 2);
    }

    #[test]
    fn test_put_rejects_chains_below_cutoff() {
        let queue = FilteredQueue::new(RAW_AUDIO);
        let chains = phrases(4);
        queue.filter(2);

        queue.put(Message::Item(chains[1].clone()));
        queue.put(Message::Item(chains[2].clone()));
        assert_eq!(queue.phrase_ids(), vec![Some(2)]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_lower_cutoff_is_ignored() {
        let queue = FilteredQueue::new(RAW_AUDIO);
        queue.filter(3);
        assert_eq!(queue.filter(1), 0);
        assert_eq!(queue.cutoff(), 3);
    }

    #[test]
    fn test_untagged_chains_and_sentinel_pass_filter() {
        let queue = FilteredQueue::new(RAW_AUDIO);
        queue.filter(5);
        queue.put(Message::Item(ContextChain::root().add(1u8, Some("other"))));
        queue.put(Message::Shutdown);
        queue.filter(10);
        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.get(), Message::Item(_)));
        assert!(queue.get().is_shutdown());
    }

    #[test]
    fn test_filtered_queue_get_blocks_until_put() {
        let queue = Arc::new(FilteredQueue::new(RAW_AUDIO));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.put(Message::Shutdown);
            })
        };
        assert!(queue.get().is_shutdown());
        producer.join().unwrap();
        assert!(queue.get_timeout(Duration::from_millis(10)).is_none());
    }
}
