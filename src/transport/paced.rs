//! Real-time pacing of outbound audio.

use crate::defaults;
use crate::pipeline::context::{ContextChain, keys};
use crate::pipeline::error::{ErrorReporter, LogReporter, StageError};
use crate::pipeline::queue::{Message, Queue};
use crate::pipeline::stop::StopFlag;
use crate::pipeline::supervisor::Component;
use crate::transport::{AudioTransport, pcm_bytes};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingConfig {
    pub sample_rate: u32,
    pub bytes_per_sample: u32,
    /// How far audio may run ahead of wall-clock time.
    pub buffer_time: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
            buffer_time: Duration::from_secs_f64(defaults::BUFFER_TIME_SECS),
        }
    }
}

impl PacingConfig {
    /// Playback duration of `bytes` of PCM.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bytes_per_second = self.sample_rate as u64 * self.bytes_per_sample.max(1) as u64;
        if bytes_per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / bytes_per_second as f64)
    }
}

/// Keeps audio sent since the last reset within `buffer_time` of the wall
/// clock. Falling behind (a chunk arriving after everything sent so far has
/// played) restarts the accounting.
#[derive(Debug, Clone)]
pub struct Pacer {
    buffer_time: Duration,
    start: Option<Instant>,
    sent: Duration,
}

impl Pacer {
    pub fn new(buffer_time: Duration) -> Self {
        Self {
            buffer_time,
            start: None,
            sent: Duration::ZERO,
        }
    }

    /// How long to wait at `now` before sending the next chunk.
    pub fn delay(&self, now: Instant) -> Duration {
        let Some(start) = self.start else {
            return Duration::ZERO;
        };
        let elapsed = now.saturating_duration_since(start);
        self.sent
            .saturating_sub(self.buffer_time)
            .saturating_sub(elapsed)
    }

    /// Accounts for a chunk of `duration` sent at `now`.
    pub fn record(&mut self, now: Instant, duration: Duration) {
        let behind = match self.start {
            Some(start) => now.saturating_duration_since(start) > self.sent,
            None => true,
        };
        if behind {
            self.start = Some(now);
            self.sent = Duration::ZERO;
        }
        self.sent += duration;
    }

    /// Audio sent since the last reset.
    pub fn sent(&self) -> Duration {
        self.sent
    }
}

/// Final pipeline component: reads [`keys::OUTPUT_AUDIO_CHUNK`] chains and
/// writes them to a transport at playback speed.
pub struct PacedSender<C: Clock = SystemClock> {
    input: Arc<dyn Queue<ContextChain>>,
    transport: Box<dyn AudioTransport>,
    config: PacingConfig,
    stop: StopFlag,
    reporter: Arc<dyn ErrorReporter>,
    clock: C,
    poll_interval: Duration,
}

impl PacedSender<SystemClock> {
    pub fn new(
        input: Arc<dyn Queue<ContextChain>>,
        transport: Box<dyn AudioTransport>,
        config: PacingConfig,
        stop: StopFlag,
    ) -> Self {
        Self {
            input,
            transport,
            config,
            stop,
            reporter: Arc::new(LogReporter),
            clock: SystemClock,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }
}

impl<C: Clock> PacedSender<C> {
    pub fn with_clock<D: Clock>(self, clock: D) -> PacedSender<D> {
        PacedSender {
            input: self.input,
            transport: self.transport,
            config: self.config,
            stop: self.stop,
            reporter: self.reporter,
            clock,
            poll_interval: self.poll_interval,
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn fail(&self, error: StageError) {
        self.reporter.report("paced-sender", &error);
        self.stop.set();
    }

    /// Sends chunks until the sentinel arrives or the stop flag is set,
    /// then closes the transport. Returns the number of chunks sent.
    pub fn run(mut self) -> usize {
        match self.transport.ready(&self.stop, self.poll_interval) {
            Ok(true) => {}
            Ok(false) => {
                self.close();
                return 0;
            }
            Err(error) => {
                self.fail(StageError::Fatal(error.to_string()));
                self.close();
                return 0;
            }
        }
        tracing::info!(transport = self.transport.name(), "audio transport ready");

        let mut pacer = Pacer::new(self.config.buffer_time);
        let mut chunks = 0;
        while !self.stop.is_set() {
            let chain = match self.input.get_timeout(self.poll_interval) {
                None => continue,
                Some(Message::Shutdown) => break,
                Some(Message::Item(chain)) => chain,
            };
            let samples = match chain.require::<Vec<i16>>(keys::OUTPUT_AUDIO_CHUNK) {
                Ok(samples) => samples,
                Err(error) => {
                    self.fail(error);
                    break;
                }
            };
            let bytes = pcm_bytes(samples);
            let duration = self.config.duration_of(bytes.len());

            let delay = pacer.delay(self.clock.now());
            if !delay.is_zero() && self.stop.wait_timeout(delay) {
                break;
            }
            pacer.record(self.clock.now(), duration);

            if let Err(error) = self.transport.send(&bytes) {
                self.fail(StageError::Fatal(error.to_string()));
                break;
            }
            chunks += 1;
            tracing::trace!(
                phrase_id = chain.index_of(keys::RAW_AUDIO),
                chunk_ms = duration.as_millis() as u64,
                ahead_ms = pacer.sent().as_millis() as u64,
                "audio chunk sent"
            );
        }

        self.close();
        tracing::info!(chunks, "audio sender closed");
        chunks
    }

    fn close(&mut self) {
        if let Err(error) = self.transport.close() {
            tracing::warn!(transport = self.transport.name(), %error, "failed to close transport");
        }
    }
}

impl<C: Clock> Component for PacedSender<C> {
    fn name(&self) -> &str {
        "paced-sender"
    }

    fn run(self: Box<Self>) {
        PacedSender::run(*self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::testing::RecordingReporter;
    use crate::pipeline::queue::StageQueue;
    use crate::transport::CollectorTransport;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn duration_of_bytes() {
        let config = PacingConfig::default();
        assert_eq!(config.duration_of(32_000), Duration::from_secs(1));
        assert_eq!(config.duration_of(320), Duration::from_millis(10));
    }

    #[test]
    fn pacer_keeps_within_buffer_time() {
        let t0 = Instant::now();
        let mut pacer = Pacer::new(100 * MS);
        assert_eq!(pacer.delay(t0), Duration::ZERO);

        pacer.record(t0, 500 * MS);
        assert_eq!(pacer.delay(t0), 400 * MS);

        pacer.record(t0 + 400 * MS, 500 * MS);
        assert_eq!(pacer.delay(t0 + 400 * MS), 500 * MS);
        assert_eq!(pacer.sent(), 1000 * MS);
    }

    #[test]
    fn pacer_resets_when_behind() {
        let t0 = Instant::now();
        let mut pacer = Pacer::new(100 * MS);
        pacer.record(t0, 200 * MS);
        pacer.record(t0 + 2000 * MS, 300 * MS);
        assert_eq!(pacer.sent(), 300 * MS);
        assert_eq!(pacer.delay(t0 + 2000 * MS), 200 * MS);
    }

    fn chunk(samples: Vec<i16>) -> Message<ContextChain> {
        Message::Item(
            ContextChain::root()
                .add(0u8, Some(keys::RAW_AUDIO))
                .add(samples, Some(keys::OUTPUT_AUDIO_CHUNK)),
        )
    }

    #[test]
    fn sends_in_order_at_playback_speed() {
        let queue = Arc::new(StageQueue::new());
        for i in 0..5 {
            // 20ms each at 16kHz.
            queue.put(chunk(vec![i; 320]));
        }
        queue.put(Message::Shutdown);

        let transport = CollectorTransport::new();
        let config = PacingConfig {
            buffer_time: Duration::ZERO,
            ..PacingConfig::default()
        };
        let sender = PacedSender::new(
            queue,
            Box::new(transport.clone()),
            config,
            StopFlag::new(),
        );

        let started = Instant::now();
        assert_eq!(sender.run(), 5);
        assert!(started.elapsed() >= 70 * MS, "sent too fast: {:?}", started.elapsed());

        let samples = transport.samples();
        assert_eq!(samples.len(), 5 * 320);
        assert_eq!(samples[4 * 320], 4);
        assert!(transport.is_closed());
    }

    #[test]
    fn missing_chunk_is_fatal() {
        let queue = Arc::new(StageQueue::new());
        queue.put(Message::Item(ContextChain::root()));
        let stop = StopFlag::new();
        let reporter = RecordingReporter::default();
        let transport = CollectorTransport::new();

        let sender = PacedSender::new(
            queue,
            Box::new(transport.clone()),
            PacingConfig::default(),
            stop.clone(),
        )
        .with_error_reporter(Arc::new(reporter.clone()));

        assert_eq!(sender.run(), 0);
        assert!(stop.is_set());
        assert!(transport.is_closed());
        assert_eq!(reporter.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_flag_ends_idle_sender() {
        let queue: Arc<StageQueue<ContextChain>> = Arc::new(StageQueue::new());
        let stop = StopFlag::new();
        stop.set();
        let transport = CollectorTransport::new();
        let sender = PacedSender::new(
            queue,
            Box::new(transport.clone()),
            PacingConfig::default(),
            stop,
        )
        .with_poll_interval(5 * MS);
        assert_eq!(sender.run(), 0);
        assert!(transport.is_closed());
    }
}
