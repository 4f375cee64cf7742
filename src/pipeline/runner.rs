//! Runs a stage over a worker pool while keeping outputs in input order.
//!
//! Every input gets a ticket when it is dequeued. Workers may finish in any
//! order, but only the worker holding the current write ticket may write to
//! the output queue: it writes each output as soon as it is produced, while
//! later tickets buffer theirs privately and flush them when their turn
//! comes. Downstream therefore sees exactly what a sequential run would have
//! produced.

use crate::defaults;
use crate::pipeline::error::{ErrorReporter, LogReporter, StageError};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::queue::{Message, Queue};
use crate::pipeline::stage::Stage;
use crate::pipeline::stop::StopFlag;
use crate::pipeline::supervisor::Component;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// State shared by the dispatch loop and the workers of one stage.
struct Shared<S: Stage> {
    stage: S,
    output: Arc<dyn Queue<S::Output>>,
    /// Ticket currently allowed to write downstream.
    write_turn: Mutex<u64>,
    turn_changed: Condvar,
    /// Set after a fatal error; later output is discarded.
    aborted: AtomicBool,
    sentinel_sent: AtomicBool,
    stop: StopFlag,
    reporter: Arc<dyn ErrorReporter>,
}

impl<S: Stage> Shared<S> {
    fn lock_turn(&self) -> MutexGuard<'_, u64> {
        self.write_turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, output: S::Output) {
        if !self.aborted.load(Ordering::SeqCst) {
            self.output.put(Message::Item(output));
        }
    }

    fn flush(&self, pending: &mut VecDeque<S::Output>) {
        while let Some(output) = pending.pop_front() {
            self.write(output);
        }
    }

    /// Forwards the shutdown sentinel unless it was already sent.
    fn send_sentinel(&self) {
        if !self.sentinel_sent.swap(true, Ordering::SeqCst) {
            self.output.put(Message::Shutdown);
        }
    }

    /// Fatal error: stop everything and push the sentinel past the ticket order.
    fn abort(&self, error: &StageError) {
        self.reporter.report(self.stage.name(), error);
        self.aborted.store(true, Ordering::SeqCst);
        self.stop.set();
        self.send_sentinel();
    }

    fn run_ticket(&self, ticket: u64, input: S::Input) {
        let mut pending = VecDeque::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.produce(ticket, input, &mut pending)
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(payload) => Some(StageError::Fatal(format!(
                "stage panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        if let Some(error) = failure {
            self.abort(&error);
        }

        let mut turn = self.lock_turn();
        while *turn != ticket {
            turn = self
                .turn_changed
                .wait(turn)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.flush(&mut pending);
        *turn += 1;
        drop(turn);
        self.turn_changed.notify_all();
    }

    fn produce(
        &self,
        ticket: u64,
        input: S::Input,
        pending: &mut VecDeque<S::Output>,
    ) -> Result<(), StageError> {
        let started = Instant::now();
        let mut produced = 0usize;
        for output in self.stage.process(input) {
            let output = output?;
            if produced == 0 {
                tracing::trace!(
                    stage = self.stage.name(),
                    ticket,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "first output"
                );
            }
            produced += 1;

            let turn = self.lock_turn();
            if *turn == ticket {
                self.flush(pending);
                self.write(output);
            } else {
                pending.push_back(output);
            }
        }
        tracing::trace!(
            stage = self.stage.name(),
            ticket,
            produced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ticket finished"
        );
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Drives one [`Stage`] from an input queue to an output queue.
///
/// Generic over the payload types, so the same runner moves context chains
/// or raw payloads. With one worker it is strictly sequential.
pub struct StageRunner<S: Stage> {
    shared: Arc<Shared<S>>,
    input: Arc<dyn Queue<S::Input>>,
    workers: usize,
    poll_interval: Duration,
}

impl<S: Stage> StageRunner<S> {
    /// Runs the stage's `setup` and prepares a runner with one worker.
    ///
    /// A setup failure is fatal: it is reported, the stop flag is set and the
    /// sentinel is forwarded before the error is returned.
    pub fn new(
        stage: S,
        input: Arc<dyn Queue<S::Input>>,
        output: Arc<dyn Queue<S::Output>>,
        stop: StopFlag,
    ) -> Result<Self, StageError> {
        Self::with_error_reporter(stage, input, output, stop, Arc::new(LogReporter))
    }

    /// Like [`new`](Self::new) with a custom error reporter.
    pub fn with_error_reporter(
        mut stage: S,
        input: Arc<dyn Queue<S::Input>>,
        output: Arc<dyn Queue<S::Output>>,
        stop: StopFlag,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, StageError> {
        let setup = stage.setup();
        let shared = Arc::new(Shared {
            stage,
            output,
            write_turn: Mutex::new(0),
            turn_changed: Condvar::new(),
            aborted: AtomicBool::new(false),
            sentinel_sent: AtomicBool::new(false),
            stop,
            reporter,
        });
        if let Err(error) = setup {
            let error = match error {
                StageError::Recoverable(msg) => StageError::Fatal(msg),
                other => other,
            };
            shared.abort(&error);
            return Err(error);
        }
        Ok(Self {
            shared,
            input,
            workers: 1,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        })
    }

    /// Sets the worker pool size (1 = sequential).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets how often the dispatch loop checks the stop flag while idle.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the name of the stage.
    pub fn name(&self) -> &'static str {
        self.shared.stage.name()
    }

    /// Dispatch loop. Returns after the sentinel was read (or the stop flag
    /// was set), all submitted work has drained and one sentinel was
    /// forwarded downstream.
    pub fn run(self) {
        let name = self.name();
        let pool = match WorkerPool::new(name, self.workers) {
            Ok(pool) => pool,
            Err(error) => {
                self.shared.abort(&StageError::Fatal(error.to_string()));
                return;
            }
        };
        tracing::debug!(stage = name, workers = pool.size(), "stage started");

        let mut next_ticket: u64 = 0;
        while !self.shared.stop.is_set() {
            match self.input.get_timeout(self.poll_interval) {
                None => continue,
                Some(Message::Shutdown) => {
                    tracing::debug!(stage = name, "received shutdown sentinel");
                    break;
                }
                Some(Message::Item(input)) => {
                    let ticket = next_ticket;
                    next_ticket += 1;
                    let shared = self.shared.clone();
                    pool.submit(move || shared.run_ticket(ticket, input));
                }
            }
        }

        pool.join();
        self.shared.stage.shutdown();
        self.shared.send_sentinel();
        tracing::debug!(stage = name, tickets = next_ticket, "stage stopped");
    }
}

impl<S: Stage> Component for StageRunner<S> {
    fn name(&self) -> &str {
        StageRunner::name(self)
    }

    fn run(self: Box<Self>) {
        StageRunner::run(*self)
    }
}
