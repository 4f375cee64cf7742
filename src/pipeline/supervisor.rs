//! Owns the threads of a running pipeline.

use crate::error::{Result, VoxError};
use crate::pipeline::stop::StopFlag;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A long-running pipeline component that gets its own thread.
pub trait Component: Send + 'static {
    /// Name used for the thread and in logs.
    fn name(&self) -> &str;

    /// Runs until the component's input is exhausted or the stop flag is set.
    fn run(self: Box<Self>);
}

/// Starts components on named threads and joins them on shutdown.
pub struct PipelineSupervisor {
    stop: StopFlag,
    pending: Vec<Box<dyn Component>>,
    threads: Vec<(String, JoinHandle<()>)>,
}

impl PipelineSupervisor {
    pub fn new(stop: StopFlag) -> Self {
        Self {
            stop,
            pending: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Registers a component to be started by [`start`](Self::start).
    pub fn add(&mut self, component: impl Component) {
        self.pending.push(Box::new(component));
    }

    /// The stop flag shared with the components.
    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// Spawns one thread per registered component.
    ///
    /// If a spawn fails, the stop flag is set so the already running
    /// components wind down, and the error is returned.
    pub fn start(&mut self) -> Result<()> {
        for component in self.pending.drain(..) {
            let name = component.name().to_string();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || component.run());
            match spawned {
                Ok(handle) => {
                    tracing::debug!(component = %name, "component started");
                    self.threads.push((name, handle));
                }
                Err(source) => {
                    self.stop.set();
                    return Err(VoxError::ThreadSpawn {
                        component: name,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// True while at least one component thread is alive.
    pub fn is_running(&self) -> bool {
        self.threads.iter().any(|(_, handle)| !handle.is_finished())
    }

    /// Sets the stop flag and joins the threads, waiting at most `grace`.
    ///
    /// Threads still running after the deadline are detached. Returns the
    /// number of threads that panicked.
    pub fn stop(&mut self, grace: Duration) -> usize {
        self.stop.set();
        self.join_until(Some(Instant::now() + grace))
    }

    /// Waits until every component has finished on its own.
    pub fn wait(&mut self) -> usize {
        self.join_until(None)
    }

    fn join_until(&mut self, deadline: Option<Instant>) -> usize {
        let poll_interval = Duration::from_millis(20);
        let mut panicked = 0;

        loop {
            let mut remaining = Vec::new();
            for (name, handle) in self.threads.drain(..) {
                if !handle.is_finished() {
                    remaining.push((name, handle));
                    continue;
                }
                if let Err(payload) = handle.join() {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    tracing::error!(component = %name, "component thread panicked: {msg}");
                    panicked += 1;
                }
            }
            self.threads = remaining;

            if self.threads.is_empty() {
                return panicked;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let names: Vec<&str> = self.threads.iter().map(|(n, _)| n.as_str()).collect();
                tracing::warn!(?names, "shutdown timeout, detaching component threads");
                self.threads.clear();
                return panicked;
            }
            thread::sleep(poll_interval);
        }
    }
}

impl Drop for PipelineSupervisor {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop(Duration::from_secs(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sleeper {
        stop: StopFlag,
        runs: Arc<AtomicUsize>,
    }

    impl Component for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }

        fn run(self: Box<Self>) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            while !self.stop.wait_timeout(Duration::from_millis(10)) {}
        }
    }

    struct Panicker;

    impl Component for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        fn run(self: Box<Self>) {
            panic!("component blew up");
        }
    }

    #[test]
    fn test_start_and_stop() {
        let stop = StopFlag::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut supervisor = PipelineSupervisor::new(stop.clone());
        for _ in 0..3 {
            supervisor.add(Sleeper {
                stop: stop.clone(),
                runs: runs.clone(),
            });
        }
        supervisor.start().unwrap();
        assert!(supervisor.is_running());

        let panicked = supervisor.stop(Duration::from_secs(5));
        assert_eq!(panicked, 0);
        assert!(!supervisor.is_running());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wait_reports_panics() {
        let mut supervisor = PipelineSupervisor::new(StopFlag::new());
        supervisor.add(Panicker);
        supervisor.start().unwrap();
        assert_eq!(supervisor.wait(), 1);
    }
}
