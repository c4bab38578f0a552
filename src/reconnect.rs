use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RpcClientError, StatusCode};
use crate::retry::{DelayPolicy, RetryDecision};

/// Why a subscription stream stopped producing events.
#[derive(Debug)]
pub enum StreamFailure {
    /// The caller unsubscribed; never followed by a reconnect. The built-in
    /// driver resolves unsubscribes through its cancellation token before any
    /// classification happens, so this variant is constructed by embedders
    /// driving a `StreamEligibility` themselves.
    Unsubscribed,
    Error(RpcClientError),
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsubscribed => formatter.write_str("unsubscribed by caller"),
            Self::Error(error) => std::fmt::Display::fmt(error, formatter),
        }
    }
}

pub trait StreamEligibility: Send + Sync {
    fn is_retryable(&self, failure: &StreamFailure) -> bool;
}

/// Treats a small set of statuses as terminal and everything else carried
/// by a structured rpc error as retryable. Failures without a status are
/// terminal: an error shape this client cannot classify does not earn a
/// reconnect.
#[derive(Clone, Debug)]
pub struct DefaultStreamEligibility {
    terminal_statuses: BTreeSet<StatusCode>,
}

impl DefaultStreamEligibility {
    pub fn standard() -> Self {
        Self {
            terminal_statuses: default_terminal_statuses(),
        }
    }

    pub fn terminal_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.terminal_statuses = statuses.into_iter().collect();
        self
    }
}

impl Default for DefaultStreamEligibility {
    fn default() -> Self {
        Self::standard()
    }
}

impl StreamEligibility for DefaultStreamEligibility {
    fn is_retryable(&self, failure: &StreamFailure) -> bool {
        match failure {
            StreamFailure::Unsubscribed => false,
            StreamFailure::Error(RpcClientError::Rpc { status, .. }) => {
                !self.terminal_statuses.contains(status)
            }
            StreamFailure::Error(RpcClientError::Timeout { .. }) => true,
            StreamFailure::Error(_) => false,
        }
    }
}

/// Reconnects at a constant interval with no attempt cap. The subscription
/// keeps trying until it is unsubscribed or hits a terminal failure.
#[derive(Clone, Debug)]
pub struct FixedReconnectDelay {
    delay: Duration,
}

impl FixedReconnectDelay {
    pub fn standard() -> Self {
        Self {
            delay: Duration::from_millis(500),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay.max(Duration::from_millis(1));
        self
    }
}

impl Default for FixedReconnectDelay {
    fn default() -> Self {
        Self::standard()
    }
}

impl DelayPolicy for FixedReconnectDelay {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}

#[derive(Clone)]
pub struct ReconnectPolicy {
    eligibility: Arc<dyn StreamEligibility>,
    delay_policy: Arc<dyn DelayPolicy>,
}

impl std::fmt::Debug for ReconnectPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("ReconnectPolicy").finish_non_exhaustive()
    }
}

impl ReconnectPolicy {
    pub fn standard() -> Self {
        Self {
            eligibility: Arc::new(DefaultStreamEligibility::standard()),
            delay_policy: Arc::new(FixedReconnectDelay::standard()),
        }
    }

    pub fn eligibility(mut self, eligibility: Arc<dyn StreamEligibility>) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn delay_policy(mut self, delay_policy: Arc<dyn DelayPolicy>) -> Self {
        self.delay_policy = delay_policy;
        self
    }

    pub fn decide(&self, failure: &StreamFailure, attempt: u32) -> RetryDecision {
        if !self.eligibility.is_retryable(failure) {
            return RetryDecision::Stop;
        }
        match self.delay_policy.next_delay(attempt) {
            Some(delay) => RetryDecision::Delay(delay),
            None => RetryDecision::Stop,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

fn default_terminal_statuses() -> BTreeSet<StatusCode> {
    [
        StatusCode::PermissionDenied,
        StatusCode::Unauthenticated,
        StatusCode::Cancelled,
        StatusCode::NotFound,
    ]
    .into_iter()
    .collect()
}
