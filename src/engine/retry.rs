//! Retry and fallback policies for provider calls.
//!
//! Two independent pieces:
//! - [`RetryPolicy`] retries one async operation with exponential backoff
//!   (`base * 2^attempt`), driven by the [`Attempt`] each call reports.
//! - [`HourFallback`] generates the candidate hours to try, walking
//!   backward from the requested hour.
//!
//! The forecast fetcher composes them: for each candidate hour, run the
//! retry policy; first success wins.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default attempts per candidate hour.
pub const MAX_RETRIES: u32 = 5;

/// Default number of hours to walk back (inclusive, so 6 candidates).
pub const MAX_BACK_OFFSET_HOURS: u32 = 5;

/// Outcome of a single attempt, as classified by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// Success; stop retrying.
    Done(T),
    /// Transient failure. Back off and try again if attempts remain.
    Retry(String),
    /// Permanent failure for this operation.
    GiveUp(String),
}

/// Why a retried operation produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStop {
    Exhausted { attempts: u32, last: String },
    GaveUp { attempt: u32, reason: String },
}

impl fmt::Display for RetryStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryStop::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryStop::GaveUp { attempt, reason } => {
                write!(f, "abandoned on attempt {attempt}: {reason}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Retry with backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    /// No sleeping between attempts. Used by tests.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay after a failed attempt (1-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` until it reports `Done`, `GiveUp`, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. No delay follows the
    /// final attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryStop>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last = String::from("no attempts made");

        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::GiveUp(reason) => return Err(RetryStop::GaveUp { attempt, reason }),
                Attempt::Retry(reason) => {
                    if attempt < self.max_attempts {
                        let delay = self.delay_for(attempt);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "Retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last = reason;
                }
            }
        }

        Err(RetryStop::Exhausted { attempts: self.max_attempts, last })
    }
}

// ---------------------------------------------------------------------------
// Hour fallback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourFallback {
    /// Largest backward offset in hours (inclusive).
    pub max_back_offset: u32,
    /// Pause between two candidate hours.
    pub pause: Duration,
}

impl Default for HourFallback {
    fn default() -> Self {
        Self {
            max_back_offset: MAX_BACK_OFFSET_HOURS,
            pause: Duration::from_millis(300),
        }
    }
}

impl HourFallback {
    pub const fn new(max_back_offset: u32, pause: Duration) -> Self {
        Self { max_back_offset, pause }
    }

    pub fn candidate_count(&self) -> usize {
        self.max_back_offset as usize + 1
    }

    /// Candidate hours, latest first: `hour(target) - 0h, -1h, ... -max_back_offset h`.
    pub fn candidates(&self, target: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> {
        let base = truncate_to_hour(target);
        (0..=self.max_back_offset).map(move |offset| base - ChronoDuration::hours(offset as i64))
    }
}

/// Drop minutes, seconds and sub-seconds.
pub fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
