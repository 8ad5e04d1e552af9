//! Retry policies and the coordinator that drives repeated attempts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{HttpClientError, RawResponse, Result};

/// Predicate deciding whether an attempt's outcome should be retried.
pub type RetryPredicateFn = Arc<dyn Fn(&AttemptOutcome<'_>) -> bool + Send + Sync>;

/// Delay before the next attempt, given the 1-based number of the attempt that just finished.
pub type RetryDelayFn = Arc<dyn Fn(u32, &AttemptOutcome<'_>) -> Duration + Send + Sync>;

/// What a single attempt produced, as seen by retry predicates.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    /// The transport returned a response (any status).
    Response(&'a RawResponse),
    /// The transport call failed.
    Failure(&'a HttpClientError),
}

impl AttemptOutcome<'_> {
    /// Status of the outcome. Timeouts report `408 Request Timeout`.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Response(response) => Some(response.status()),
            Self::Failure(error) if error.is_timeout() => Some(StatusCode::REQUEST_TIMEOUT),
            Self::Failure(error) => error.status_code(),
        }
    }

    /// Whether the transport timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Failure(error) if error.is_timeout())
    }

    /// Whether the transport could not connect or lost the connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Failure(error) if error.is_connection() || matches!(error, HttpClientError::Body(_))
        )
    }

    /// The response, if one was received.
    pub fn response(&self) -> Option<&RawResponse> {
        match *self {
            Self::Response(response) => Some(response),
            Self::Failure(_) => None,
        }
    }

    /// The failure, if the transport call failed.
    pub fn error(&self) -> Option<&HttpClientError> {
        match *self {
            Self::Response(_) => None,
            Self::Failure(error) => Some(error),
        }
    }
}

/// Retry strategy trait for custom retry logic.
pub trait RetryStrategy: Send + Sync {
    /// Total attempts allowed, including the first. Always at least 1.
    fn max_attempts(&self) -> u32;

    /// Check if the outcome should be retried.
    fn should_retry(&self, outcome: &AttemptOutcome<'_>) -> bool;

    /// Get the delay before the next attempt.
    fn retry_delay(&self, attempt: u32, outcome: &AttemptOutcome<'_>) -> Duration;
}

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Delay increment per attempt.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay doubles each attempt.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate delay for a given retry (0-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { delay, max } => {
                let total = delay.saturating_mul(retry.saturating_add(1));
                total.min(*max)
            }
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.powi(retry.min(i32::MAX as u32) as i32);
                let millis = (initial.as_millis() as f64 * factor).min(max.as_millis() as f64);
                Duration::from_millis(millis as u64).min(*max)
            }
        }
    }
}

/// Retry policy: attempt budget, retry predicate and delay.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffStrategy,
    retry_status_codes: Vec<u16>,
    retry_on_connection_error: bool,
    retry_on_timeout: bool,
    predicate: Option<RetryPredicateFn>,
    delay: Option<RetryDelayFn>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
                multiplier: 2.0,
            },
            retry_status_codes: vec![408, 429, 500, 502, 503, 504],
            retry_on_connection_error: true,
            retry_on_timeout: true,
            predicate: None,
            delay: None,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retry_status_codes", &self.retry_status_codes)
            .field("retry_on_connection_error", &self.retry_on_connection_error)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("custom_predicate", &self.predicate.is_some())
            .field("custom_delay", &self.delay.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Create a retry policy with exponential backoff.
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Exponential {
                initial: initial_delay,
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    /// Create a retry policy with linear backoff.
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Linear {
                delay,
                max: Duration::from_secs(30),
            },
            ..Default::default()
        }
    }

    /// Create a retry policy with constant delay.
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Constant(delay),
            ..Default::default()
        }
    }

    /// Create a retry policy with no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::None,
            ..Default::default()
        }
    }

    /// Create a policy from an explicit predicate and delay function.
    pub fn custom<P, D>(max_attempts: u32, should_retry: P, delay: D) -> Self
    where
        P: Fn(&AttemptOutcome<'_>) -> bool + Send + Sync + 'static,
        D: Fn(u32, &AttemptOutcome<'_>) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_attempts: max_attempts.max(1),
            predicate: Some(Arc::new(should_retry)),
            delay: Some(Arc::new(delay)),
            ..Self::immediate(1)
        }
    }

    /// Replace the status codes that trigger a retry.
    pub fn with_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.retry_status_codes = codes;
        self
    }

    /// Disable retry on connection errors.
    pub fn no_retry_on_connection(mut self) -> Self {
        self.retry_on_connection_error = false;
        self
    }

    /// Disable retry on timeout errors.
    pub fn no_retry_on_timeout(mut self) -> Self {
        self.retry_on_timeout = false;
        self
    }

    /// Replace the retry predicate.
    pub fn with_predicate<P>(mut self, should_retry: P) -> Self
    where
        P: Fn(&AttemptOutcome<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(should_retry));
        self
    }

    /// Replace the delay function.
    pub fn with_delay<D>(mut self, delay: D) -> Self
    where
        D: Fn(u32, &AttemptOutcome<'_>) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Arc::new(delay));
        self
    }

    /// The backoff strategy used when no delay function is set.
    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Check if a status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }
}

impl RetryStrategy for RetryPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn should_retry(&self, outcome: &AttemptOutcome<'_>) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(outcome);
        }

        if outcome.is_timeout() {
            return self.retry_on_timeout;
        }
        if outcome.is_connection_error() {
            return self.retry_on_connection_error;
        }
        outcome
            .status()
            .is_some_and(|status| self.should_retry_status(status.as_u16()))
    }

    fn retry_delay(&self, attempt: u32, outcome: &AttemptOutcome<'_>) -> Duration {
        match &self.delay {
            Some(delay) => delay(attempt, outcome),
            None => self.backoff.delay_for_attempt(attempt.saturating_sub(1)),
        }
    }
}

/// Drives one logical send through 1..N attempts.
///
/// With several strategies, the first one whose predicate matches an outcome
/// governs that retry, and each strategy keeps its own attempt budget. With
/// none, exactly one attempt is made.
#[derive(Clone, Default)]
pub struct RetryCoordinator {
    strategies: Vec<Arc<dyn RetryStrategy>>,
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

impl RetryCoordinator {
    /// A coordinator that never retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// A coordinator with a single strategy.
    pub fn new<S: RetryStrategy + 'static>(strategy: S) -> Self {
        Self {
            strategies: vec![Arc::new(strategy)],
        }
    }

    /// A coordinator trying each strategy in order.
    pub fn chained<I, S>(strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: RetryStrategy + 'static,
    {
        Self {
            strategies: strategies
                .into_iter()
                .map(|strategy| Arc::new(strategy) as Arc<dyn RetryStrategy>)
                .collect(),
        }
    }

    /// Add another strategy after the existing ones.
    pub fn with_strategy<S: RetryStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Whether any strategy is attached.
    pub fn is_enabled(&self) -> bool {
        !self.strategies.is_empty()
    }

    /// Run `dispatch` until no strategy wants a retry or the budget runs out.
    ///
    /// `dispatch` receives the 1-based attempt number. The last outcome is
    /// returned as-is when retries are exhausted. Cancellation aborts both the
    /// in-flight attempt and any pending delay.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut dispatch: F,
    ) -> Result<RawResponse>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<RawResponse>>,
    {
        if cancel.is_cancelled() {
            return Err(HttpClientError::Cancelled);
        }
        if self.strategies.is_empty() {
            return run_attempt(cancel, dispatch(1)).await;
        }

        let mut retries = vec![0u32; self.strategies.len()];
        let mut attempt = 1;

        loop {
            trace!(attempt, "Dispatching attempt");
            let result = run_attempt(cancel, dispatch(attempt)).await;

            if let Err(error) = &result
                && (error.is_cancelled() || error.is_configuration())
            {
                return result;
            }

            let delay = {
                let outcome = match &result {
                    Ok(response) => AttemptOutcome::Response(response),
                    Err(error) => AttemptOutcome::Failure(error),
                };
                self.next_delay(attempt, &mut retries, &outcome)
            };
            let Some(delay) = delay else {
                return result;
            };
            drop(result);

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(HttpClientError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else if cancel.is_cancelled() {
                return Err(HttpClientError::Cancelled);
            }

            attempt += 1;
        }
    }
    /// Delay before the next attempt, or `None` when `outcome` is final.
    fn next_delay(
        &self,
        attempt: u32,
        retries: &mut [u32],
        outcome: &AttemptOutcome<'_>,
    ) -> Option<Duration> {
        let index = self.strategies.iter().position(|s| s.should_retry(outcome))?;
        let strategy = &self.strategies[index];

        if retries[index] + 1 >= strategy.max_attempts() {
            warn!(
                attempts = attempt,
                status = ?outcome.status(),
                "Retry attempts exhausted"
            );
            return None;
        }
        retries[index] += 1;

        let delay = strategy.retry_delay(attempt, outcome);
        match outcome {
            AttemptOutcome::Response(response) => debug!(
                attempt,
                status = %response.status(),
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            ),
            AttemptOutcome::Failure(error) => debug!(
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Retrying request due to error"
            ),
        }
        Some(delay)
    }
}

async fn run_attempt<Fut>(cancel: &CancellationToken, attempt: Fut) -> Result<RawResponse>
where
    Fut: Future<Output = Result<RawResponse>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HttpClientError::Cancelled),
        result = attempt => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn response(status: u16) -> RawResponse {
        RawResponse::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            status.to_string(),
        )
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        };

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(strategy.delay_for_attempt(200), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_backoff() {
        let strategy = BackoffStrategy::Linear {
            delay: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(9), Duration::from_secs(1));
    }

    #[test]
    fn test_constant_backoff() {
        let strategy = BackoffStrategy::Constant(Duration::from_millis(500));

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(strategy.delay_for_attempt(5), Duration::from_millis(500));
    }

    #[test]
    fn test_policy_classifies_outcomes() {
        let policy = RetryPolicy::immediate(3);
        let unavailable = response(503);
        let not_found = response(404);
        let timeout = HttpClientError::Timeout("read".into());
        let refused = HttpClientError::Connection("refused".into());

        assert!(policy.should_retry(&AttemptOutcome::Response(&unavailable)));
        assert!(!policy.should_retry(&AttemptOutcome::Response(&not_found)));
        assert!(policy.should_retry(&AttemptOutcome::Failure(&timeout)));
        assert!(policy.should_retry(&AttemptOutcome::Failure(&refused)));

        let strict = RetryPolicy::immediate(3)
            .no_retry_on_timeout()
            .no_retry_on_connection();
        assert!(!strict.should_retry(&AttemptOutcome::Failure(&timeout)));
        assert!(!strict.should_retry(&AttemptOutcome::Failure(&refused)));
    }

    #[test]
    fn test_timeout_outcome_is_request_timeout_shaped() {
        let timeout = HttpClientError::Timeout("read".into());
        let outcome = AttemptOutcome::Failure(&timeout);
        assert_eq!(outcome.status(), Some(StatusCode::REQUEST_TIMEOUT));

        let policy = RetryPolicy::custom(
            2,
            |outcome| outcome.status() == Some(StatusCode::REQUEST_TIMEOUT),
            |_, _| Duration::ZERO,
        );
        assert!(policy.should_retry(&outcome));
    }

    #[test]
    fn test_max_attempts_is_at_least_one() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_no_policy_makes_single_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = RetryCoordinator::none()
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(response(503)) }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_policy_never_consults_predicate() {
        let coordinator = RetryCoordinator::none();
        assert!(!coordinator.is_enabled());

        let cancel = CancellationToken::new();
        let err = coordinator
            .execute(&cancel, |_| async {
                Err(HttpClientError::Timeout("read".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryPolicy::immediate(3));

        let result = coordinator
            .execute(&cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Ok(response(503))
                    } else {
                        Ok(response(200))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_response() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryPolicy::immediate(2));

        let result = coordinator
            .execute(&cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(response(if attempt == 1 { 503 } else { 502 })) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_failure() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryPolicy::immediate(2));

        let err = coordinator
            .execute(&cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(HttpClientError::Timeout(format!("attempt {attempt}"))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, HttpClientError::Timeout(ref msg) if msg == "attempt 2"));
    }

    #[tokio::test]
    async fn test_non_retryable_outcome_is_terminal() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryPolicy::immediate(5));

        let result = coordinator
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(response(404)) }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_configuration_errors_are_never_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator =
            RetryCoordinator::new(RetryPolicy::immediate(5).with_predicate(|_| true));

        let err = coordinator
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(HttpClientError::Configuration("body consumed".into())) }
            })
            .await
            .unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delay_receives_attempt_number() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryPolicy::custom(
            3,
            |outcome| outcome.status() == Some(StatusCode::TOO_MANY_REQUESTS),
            move |attempt, outcome| {
                recorded.lock().push((attempt, outcome.status()));
                Duration::ZERO
            },
        ));

        let _ = coordinator
            .execute(&cancel, |_| async { Ok(response(429)) })
            .await;

        assert_eq!(
            *seen.lock(),
            vec![
                (1, Some(StatusCode::TOO_MANY_REQUESTS)),
                (2, Some(StatusCode::TOO_MANY_REQUESTS))
            ]
        );
    }

    #[tokio::test]
    async fn test_chained_strategies_keep_separate_budgets() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(
            RetryPolicy::immediate(2).with_predicate(|o| o.status() == Some(StatusCode::TOO_MANY_REQUESTS)),
        )
        .with_strategy(
            RetryPolicy::immediate(2).with_predicate(|o| o.status() == Some(StatusCode::SERVICE_UNAVAILABLE)),
        );

        let result = coordinator
            .execute(&cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        1 => Ok(response(429)),
                        2 => Ok(response(503)),
                        _ => Ok(response(200)),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predicate_can_retry_success_status() {
        let calls = AtomicU32::new(0);
        let predicate_calls = Arc::new(AtomicU32::new(0));
        let seen = predicate_calls.clone();
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryPolicy::immediate(3).with_predicate(
            move |outcome| {
                seen.fetch_add(1, Ordering::SeqCst);
                outcome.status() == Some(StatusCode::ACCEPTED)
            },
        ));

        let result = coordinator
            .execute(&cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(response(if attempt == 1 { 202 } else { 200 })) }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(predicate_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_policy_does_not_retry_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryPolicy::immediate(3));

        let result = coordinator
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(response(204)) }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::NO_CONTENT);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chained_accepts_policies() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::chained([
            RetryPolicy::immediate(2).with_predicate(|o| o.status() == Some(StatusCode::TOO_MANY_REQUESTS)),
            RetryPolicy::immediate(2).with_predicate(|o| o.status() == Some(StatusCode::BAD_GATEWAY)),
        ]);
        assert!(coordinator.is_enabled());

        let result = coordinator
            .execute(&cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        1 => Ok(response(502)),
                        2 => Ok(response(429)),
                        _ => Ok(response(201)),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_prevents_next_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let coordinator =
            RetryCoordinator::new(RetryPolicy::constant(3, Duration::from_secs(5)));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let counter = calls.clone();
        let err = coordinator
            .execute(&cancel, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(response(503)) }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = RetryCoordinator::new(RetryPolicy::immediate(3))
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(response(200)) }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_dispatch_is_cancellation_not_timeout() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = RetryCoordinator::new(RetryPolicy::immediate(3))
            .execute(&cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(HttpClientError::Timeout("read".into()))
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }
}
