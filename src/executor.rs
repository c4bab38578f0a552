use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn};

use crate::TetherResult;
use crate::error::{RpcClientError, TimeoutPhase};
use crate::request::RequestDescriptor;
use crate::response::UnaryResponse;
use crate::retry::{
    DelayPolicy, FixedCountPolicy, RetryDecision, RetryEligibility, StrictRetryEligibility,
    evaluate_retry,
};
use crate::transport::UnaryTransport;
use crate::util::{bounded_retry_delay, remaining_budget};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug)]
struct AttemptState {
    attempt: u32,
    started_at: Instant,
}

/// Drives one unary call to completion: picks a transport, replays the
/// captured descriptor on each attempt, and consults the eligibility and
/// delay policies between attempts. All attempts of one call go to the
/// same transport; successive calls rotate through the configured set.
pub struct UnaryExecutor {
    client_name: String,
    transports: Vec<Arc<dyn UnaryTransport>>,
    next_transport: AtomicUsize,
    eligibility: Arc<dyn RetryEligibility>,
    delay_policy: Arc<dyn DelayPolicy>,
    request_timeout: Duration,
}

impl UnaryExecutor {
    pub fn new(transports: Vec<Arc<dyn UnaryTransport>>) -> Self {
        Self {
            client_name: "tether".to_owned(),
            transports,
            next_transport: AtomicUsize::new(0),
            eligibility: Arc::new(StrictRetryEligibility::standard()),
            delay_policy: Arc::new(FixedCountPolicy::standard()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn eligibility(mut self, eligibility: Arc<dyn RetryEligibility>) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn delay_policy(mut self, delay_policy: Arc<dyn DelayPolicy>) -> Self {
        self.delay_policy = delay_policy;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    pub async fn execute(&self, request: &RequestDescriptor) -> TetherResult<UnaryResponse> {
        let cancel = CancellationToken::new();
        self.execute_with_cancellation(request, &cancel).await
    }

    pub async fn execute_with_cancellation(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> TetherResult<UnaryResponse> {
        if self.transports.is_empty() {
            return Err(RpcClientError::InvalidConfiguration {
                message: "no unary transports configured".to_owned(),
            });
        }
        let cursor = self.next_transport.fetch_add(1, Ordering::Relaxed);
        let transport = Arc::clone(&self.transports[cursor % self.transports.len()]);
        let request_started_at = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let state = AttemptState {
                attempt,
                started_at: Instant::now(),
            };
            let span = info_span!(
                "tether.request",
                client = %self.client_name,
                method = %request.method(),
                attempt = state.attempt
            );
            let _enter = span.enter();

            debug!("sending request");
            let Some(attempt_budget) = remaining_budget(self.request_timeout, request_started_at)
            else {
                return Err(RpcClientError::Timeout {
                    phase: TimeoutPhase::Request,
                    timeout_ms: self.request_timeout.as_millis(),
                });
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(RpcClientError::Cancelled),
                sent = timeout(attempt_budget, transport.send(request)) => match sent {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(RpcClientError::Timeout {
                            phase: TimeoutPhase::Request,
                            timeout_ms: self.request_timeout.as_millis(),
                        });
                    }
                },
            };

            let error = match outcome {
                Ok(response) => {
                    debug!(
                        elapsed_ms = state.started_at.elapsed().as_millis() as u64,
                        "request completed"
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            // Only structured rpc failures are candidates for a retry.
            let Some(status) = error.status() else {
                return Err(error);
            };
            match evaluate_retry(
                self.eligibility.as_ref(),
                self.delay_policy.as_ref(),
                status,
                request,
                attempt,
            ) {
                RetryDecision::Stop => {
                    debug!(status = %status, "failure is not retryable");
                    return Err(error);
                }
                RetryDecision::Delay(retry_delay) => {
                    let Some(retry_delay) =
                        bounded_retry_delay(retry_delay, self.request_timeout, request_started_at)
                    else {
                        return Err(error);
                    };
                    warn!(
                        delay_ms = retry_delay.as_millis() as u64,
                        error = %error,
                        "retrying request after transient rpc failure"
                    );
                    if !retry_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(RpcClientError::Cancelled),
                            _ = sleep(retry_delay) => {}
                        }
                    } else if cancel.is_cancelled() {
                        return Err(RpcClientError::Cancelled);
                    }
                }
            }
        }
    }
}
