//! Retry policy
//!
//! Bounded by both an attempt count and a deadline, whichever comes first.
//! The deadline never interrupts an in-flight call; it only stops further
//! attempts.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub deadline: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            deadline: Duration::from_secs(300),
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            },
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            deadline: Duration::ZERO,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration, deadline: Duration) -> Self {
        Self {
            max_attempts,
            deadline,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }

    /// Delay before retrying, or `None` once attempts or time are used up
    pub fn next_delay(&self, attempts_made: u32, elapsed: Duration) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(attempts_made);
        if elapsed.saturating_add(delay) >= self.deadline {
            return None;
        }
        Some(delay)
    }
}
