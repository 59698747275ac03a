use crate::error::{PipelineError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

/// Default number of failed try-acquire attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100_000;

/// Default sleep between two try-acquire attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_micros(10);

/// Emit a progress trace every this many failed attempts
const PROGRESS_EVERY: u32 = 1_000;

/// Bounded try-acquire policy applied to every buffer operation.
///
/// A buffer operation never waits on its lock for longer than roughly
/// `(max_attempts - 1) * retry_interval`; past that it reports a lock timeout
/// instead of blocking the calling stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    max_attempts: u32,
    retry_interval: Duration,
}

impl LockPolicy {
    /// Create a policy; at least one attempt is required
    pub fn new(max_attempts: u32, retry_interval: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(PipelineError::InvalidLockPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_attempts,
            retry_interval,
        })
    }

    /// Number of failed attempts tolerated before timing out
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep between attempts
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Upper bound on the time spent sleeping in one acquisition. The last
    /// failed attempt gives up without sleeping.
    pub fn window(&self) -> Duration {
        self.retry_interval.saturating_mul(self.max_attempts - 1)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Try to take `mutex` under `policy`.
///
/// Returns the guard, or the number of failed attempts once the policy is
/// exhausted. A timeout is logged as a warning so it can be told apart from
/// an ordinary full or empty buffer.
pub(crate) fn acquire<'a, T>(
    mutex: &'a Mutex<T>,
    policy: &LockPolicy,
    op: &'static str,
) -> std::result::Result<MutexGuard<'a, T>, u32> {
    let mut attempts = 0u32;
    loop {
        if let Some(guard) = mutex.try_lock() {
            return Ok(guard);
        }
        attempts += 1;
        if attempts >= policy.max_attempts {
            warn!(op, attempts, "lock not acquired, giving up (possible deadlock or overload)");
            return Err(attempts);
        }
        if attempts % PROGRESS_EVERY == 0 {
            trace!(op, attempts, "still waiting for buffer lock");
        }
        thread::sleep(policy.retry_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_default_policy() {
        let policy = LockPolicy::default();
        assert_eq!(policy.max_attempts(), 100_000);
        assert_eq!(policy.retry_interval(), Duration::from_micros(10));
        assert_eq!(policy.window(), Duration::from_micros(999_990));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = LockPolicy::new(0, Duration::from_micros(1));
        assert!(matches!(result, Err(PipelineError::InvalidLockPolicy(_))));
    }

    #[test]
    fn test_acquire_uncontended() {
        let mutex = Mutex::new(7u32);
        let guard = acquire(&mutex, &LockPolicy::default(), "test").unwrap();
        assert_eq!(*guard, 7);
    }

    #[test]
    fn test_acquire_times_out_while_held() {
        let mutex = Mutex::new(());
        let policy = LockPolicy::new(5, Duration::from_micros(1)).unwrap();
        let _held = mutex.lock();
        let attempts = acquire(&mutex, &policy, "test").unwrap_err();
        assert_eq!(attempts, 5);
    }

    #[test]
    fn test_window_matches_time_spent_sleeping() {
        let mutex = Mutex::new(());
        let policy = LockPolicy::new(4, Duration::from_millis(20)).unwrap();
        assert_eq!(policy.window(), Duration::from_millis(60));

        let _held = mutex.lock();
        let started = Instant::now();
        assert_eq!(acquire(&mutex, &policy, "test").unwrap_err(), 4);
        assert!(started.elapsed() >= policy.window());
    }

    #[test]
    fn test_single_attempt_policy() {
        let mutex = Mutex::new(());
        let policy = LockPolicy::new(1, Duration::ZERO).unwrap();
        assert_eq!(policy.window(), Duration::ZERO);
        let _held = mutex.lock();
        assert_eq!(acquire(&mutex, &policy, "test").unwrap_err(), 1);
    }
}
