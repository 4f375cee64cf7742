//! Shared stop flag observed by every pipeline component.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Cloneable flag that, once set, stays set.
///
/// Besides polling with [`is_set`](StopFlag::is_set), a thread can sleep on
/// the flag with [`wait_timeout`](StopFlag::wait_timeout) and is woken as
/// soon as another thread sets it.
#[derive(Clone, Default)]
pub struct StopFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every sleeper.
    pub fn set(&self) {
        let (lock, wake) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout` unless the flag gets set. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, wake) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl std::fmt::Debug for StopFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopFlag")
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_flag_starts_clear_and_stays_set() {
        let flag = StopFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = StopFlag::new();
        let other = flag.clone();
        other.set();
        assert!(flag.is_set());
    }

    #[test]
    fn test_wait_timeout_expires_when_clear() {
        let flag = StopFlag::new();
        let start = Instant::now();
        assert!(!flag.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_timeout_wakes_on_set() {
        let flag = StopFlag::new();
        let setter = {
            let flag = flag.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.set();
            })
        };
        let start = Instant::now();
        assert!(flag.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(5));
        setter.join().unwrap();
    }
}
