//! Outbound audio delivery.
//!
//! The pipeline ends in a [`PacedSender`] that writes synthesized PCM to an
//! [`AudioTransport`] no faster than real time plus a small lead.

pub mod paced;
pub mod tcp;

pub use paced::{Clock, PacedSender, Pacer, PacingConfig, SystemClock};
pub use tcp::TcpTransport;

use crate::error::Result;
use crate::pipeline::stop::StopFlag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Destination for outbound PCM bytes.
pub trait AudioTransport: Send + 'static {
    /// Blocks until the transport can take data, polling `stop` every
    /// `poll_interval`. Returns `false` if stopped first.
    fn ready(&mut self, _stop: &StopFlag, _poll_interval: Duration) -> Result<bool> {
        Ok(true)
    }

    /// Sends one chunk.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Ends the session. Called once, also after errors.
    fn close(&mut self) -> Result<()>;

    /// Name for logging.
    fn name(&self) -> &'static str {
        "transport"
    }
}

/// In-memory transport that records every chunk. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct CollectorTransport {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl CollectorTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks received so far.
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All received bytes decoded as little-endian 16-bit samples.
    pub fn samples(&self) -> Vec<i16> {
        self.chunks()
            .concat()
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AudioTransport for CollectorTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Encodes samples as little-endian bytes.
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_records_and_decodes() {
        let mut transport = CollectorTransport::new();
        let observer = transport.clone();
        transport.send(&pcm_bytes(&[1, -2])).unwrap();
        transport.send(&pcm_bytes(&[300])).unwrap();
        transport.close().unwrap();

        assert_eq!(observer.chunks().len(), 2);
        assert_eq!(observer.samples(), vec![1, -2, 300]);
        assert!(observer.is_closed());
    }

    #[test]
    fn transport_is_object_safe() {
        let mut transport: Box<dyn AudioTransport> = Box::new(CollectorTransport::new());
        assert!(transport.ready(&StopFlag::new(), Duration::ZERO).unwrap());
        assert_eq!(transport.name(), "collector");
    }
}
