use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

use crate::error::StatusCode;
use crate::request::RequestDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Delay(Duration),
    Stop,
}

pub trait RetryEligibility: Send + Sync {
    fn is_retryable(&self, status: StatusCode, request: &RequestDescriptor) -> bool;
}

#[derive(Clone, Debug)]
pub struct StrictRetryEligibility {
    retryable_statuses: BTreeSet<StatusCode>,
}

impl StrictRetryEligibility {
    pub fn standard() -> Self {
        Self {
            retryable_statuses: default_retryable_statuses(),
        }
    }

    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }
}

impl Default for StrictRetryEligibility {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryEligibility for StrictRetryEligibility {
    fn is_retryable(&self, status: StatusCode, request: &RequestDescriptor) -> bool {
        request.idempotency().is_replay_safe() && self.retryable_statuses.contains(&status)
    }
}

#[derive(Clone, Debug)]
pub struct PermissiveRetryEligibility {
    retryable_statuses: BTreeSet<StatusCode>,
}

impl PermissiveRetryEligibility {
    pub fn standard() -> Self {
        Self {
            retryable_statuses: default_retryable_statuses(),
        }
    }

    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }
}

impl Default for PermissiveRetryEligibility {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryEligibility for PermissiveRetryEligibility {
    fn is_retryable(&self, status: StatusCode, _request: &RequestDescriptor) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

/// Delay schedule consulted after each failed attempt. `attempt` is the
/// 1-based ordinal of the attempt that just failed; `None` means stop
/// retrying.
pub trait DelayPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

#[derive(Clone, Debug)]
pub struct FixedCountPolicy {
    max_attempts: u32,
}

impl FixedCountPolicy {
    pub fn standard() -> Self {
        Self { max_attempts: 3 }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for FixedCountPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl DelayPolicy for FixedCountPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        Some(Duration::ZERO)
    }
}

/// Retries at a constant interval until either the attempt cap or the
/// cumulative delay cap is reached, whichever comes first.
#[derive(Clone, Debug)]
pub struct FixedDelayPolicy {
    max_attempts: u32,
    delay: Duration,
    max_cumulative_delay: Duration,
}

impl FixedDelayPolicy {
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
            max_cumulative_delay: Duration::from_secs(5),
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay.max(Duration::from_millis(1));
        if self.max_cumulative_delay < self.delay {
            self.max_cumulative_delay = self.delay;
        }
        self
    }

    pub fn max_cumulative_delay(mut self, max_cumulative_delay: Duration) -> Self {
        self.max_cumulative_delay = max_cumulative_delay.max(self.delay);
        self
    }
}

impl Default for FixedDelayPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl DelayPolicy for FixedDelayPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        if self.delay.saturating_mul(attempt) > self.max_cumulative_delay {
            return None;
        }
        Some(self.delay)
    }
}

/// Doubles a base delay per attempt up to `max_backoff`, then samples the
/// returned delay uniformly from `[base, 3 * base]`. With the standard
/// settings the first retry waits between 1 and 3 milliseconds and the
/// base stops growing at 8 milliseconds. Never stops on its own; the
/// caller's deadline bounds the attempt count.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffPolicy {
    initial_delay: Duration,
    max_backoff: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn standard() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
        }
    }

    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay.max(Duration::from_millis(1));
        if self.max_backoff < self.initial_delay {
            self.max_backoff = self.initial_delay;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.initial_delay);
        self
    }

    fn base_delay_ms(&self, attempt: u32) -> u128 {
        let capped_exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 1_u128 << capped_exponent;
        let initial_ms = self.initial_delay.as_millis().max(1);
        let max_ms = self.max_backoff.as_millis().max(initial_ms);
        initial_ms.saturating_mul(multiplier).min(max_ms)
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl DelayPolicy for ExponentialBackoffPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let base_ms = self.base_delay_ms(attempt);
        let upper_ms = base_ms.saturating_mul(3);
        Some(jitter_between_ms(base_ms, upper_ms))
    }
}

pub fn evaluate_retry(
    eligibility: &dyn RetryEligibility,
    delay_policy: &dyn DelayPolicy,
    status: StatusCode,
    request: &RequestDescriptor,
    attempt: u32,
) -> RetryDecision {
    if !eligibility.is_retryable(status, request) {
        return RetryDecision::Stop;
    }
    match delay_policy.next_delay(attempt) {
        Some(delay) => RetryDecision::Delay(delay),
        None => RetryDecision::Stop,
    }
}

fn default_retryable_statuses() -> BTreeSet<StatusCode> {
    [StatusCode::Unavailable, StatusCode::Internal]
        .into_iter()
        .collect()
}

fn jitter_between_ms(low_ms: u128, high_ms: u128) -> Duration {
    let low = low_ms.min(u64::MAX as u128) as u64;
    let high = high_ms.min(u64::MAX as u128) as u64;
    if low >= high {
        return Duration::from_millis(low);
    }
    let mut rng = rand::rng();
    Duration::from_millis(rng.random_range(low..=high))
}
