//! One-shot streaming handoff between a producing and a consuming thread.
//!
//! A stage creates a [`StreamHandle`], forwards it downstream straight away and
//! keeps filling it from its worker. The consumer drains chunks as they arrive
//! instead of waiting for the whole result.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Stream of synthesized PCM chunks.
pub type AudioStream = StreamHandle<Vec<i16>>;

/// Misuse or end of a [`StreamHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// `put` after `close`.
    #[error("stream is closed")]
    Closed,
    /// The end marker was read; the stream yields nothing more.
    #[error("end of stream")]
    EndOfStream,
}

enum StreamItem<T> {
    Chunk(T),
    End,
}

/// Single-producer/single-consumer FIFO terminated by an end marker.
///
/// Not restartable. Only one thread may consume it: two consumers would
/// split the chunks between them and only one would see the end marker.
pub struct StreamHandle<T> {
    tx: Sender<StreamItem<T>>,
    rx: Receiver<StreamItem<T>>,
    closed: AtomicBool,
    finished: AtomicBool,
}

impl<T> StreamHandle<T> {
    /// Creates an open, empty stream.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            closed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// Enqueues a chunk for the consumer.
    pub fn put(&self, chunk: T) -> Result<(), StreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        self.tx
            .send(StreamItem::Chunk(chunk))
            .map_err(|_| StreamError::Closed)
    }

    /// Enqueues the end marker. Calling it again has no effect.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // The receiver lives in `self`, so the send cannot fail.
            self.tx.send(StreamItem::End).ok();
        }
    }

    /// Whether the producer has closed the stream.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Blocks until the next chunk or the end marker arrives.
    ///
    /// Returns [`StreamError::EndOfStream`] once the end marker is read and on
    /// every call after that.
    pub fn next(&self) -> Result<T, StreamError> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(StreamError::EndOfStream);
        }
        match self.rx.recv() {
            Ok(StreamItem::Chunk(chunk)) => Ok(chunk),
            Ok(StreamItem::End) | Err(_) => {
                self.finished.store(true, Ordering::SeqCst);
                Err(StreamError::EndOfStream)
            }
        }
    }

    /// Iterates chunks until the end marker.
    pub fn iter(&self) -> StreamIter<'_, T> {
        StreamIter { stream: self }
    }
}

impl<T> Default for StreamHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("pending", &self.rx.len())
            .field("closed", &self.is_closed())
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish()
    }
}

/// Blocking iterator over a [`StreamHandle`].
pub struct StreamIter<'a, T> {
    stream: &'a StreamHandle<T>,
}

impl<T> Iterator for StreamIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.stream.next().ok()
    }
}
