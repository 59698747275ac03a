use crate::error::{PipelineError, Result};
use crate::lock::LockPolicy;
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Delay inserted between successive operations of a role.
///
/// Pacing is rate control only; it has no bearing on correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Run back to back
    #[default]
    None,
    /// Deterministic spacing
    Fixed(Duration),
    /// Delay drawn uniformly from `base..=base + spread`
    Jitter { base: Duration, spread: Duration },
}

impl Pacing {
    /// Fixed delay given in microseconds
    pub fn fixed_micros(micros: u64) -> Self {
        Pacing::Fixed(Duration::from_micros(micros))
    }

    /// Jittered delay given in microseconds
    pub fn jitter_micros(base: u64, spread: u64) -> Self {
        Pacing::Jitter {
            base: Duration::from_micros(base),
            spread: Duration::from_micros(spread),
        }
    }

    /// Longest delay this pacing can produce
    pub fn max_delay(&self) -> Duration {
        match *self {
            Pacing::None => Duration::ZERO,
            Pacing::Fixed(delay) => delay,
            Pacing::Jitter { base, spread } => base.saturating_add(spread),
        }
    }

    /// Draw the next delay
    pub fn next_delay(&self) -> Duration {
        match *self {
            Pacing::None => Duration::ZERO,
            Pacing::Fixed(delay) => delay,
            Pacing::Jitter { base, spread } => {
                let spread_us = spread.as_micros().min(u64::MAX as u128) as u64;
                let extra = rand::rng().random_range(0..=spread_us);
                base.saturating_add(Duration::from_micros(extra))
            }
        }
    }

    /// Sleep for the next delay, if any
    pub fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    /// Reject jitter that could outlast the lock retry window
    pub fn validate(&self, policy: &LockPolicy) -> Result<()> {
        if let Pacing::Jitter { .. } = self {
            if self.max_delay() > policy.window() {
                return Err(PipelineError::InvalidPacing(format!(
                    "jitter up to {:?} exceeds lock retry window of {:?}",
                    self.max_delay(),
                    policy.window()
                )));
            }
        }
        Ok(())
    }
}
