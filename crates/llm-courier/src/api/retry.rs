//! Bounded retry with exponential backoff and jitter.
//!
//! Wraps a single HTTP attempt. Transport failures and responses with a
//! transient status (429, 500, 502, 503, 504) are retried while attempts
//! remain; every other response, 4xx included, is handed back unchanged for
//! the caller to interpret.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::events::{ClientEvent, EventHandler};

/// Status codes treated as transient.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry behavior for one call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (values below 1 act as 1).
    pub max_attempts: u32,
    /// Response statuses that trigger a retry.
    pub retryable_status_codes: Vec<u16>,
    /// Delay before the first retry; doubles for each later one.
    pub base_delay: Duration,
    /// Exclusive upper bound of the uniform random offset added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retryable_status_codes: RETRYABLE_STATUS_CODES.to_vec(),
            base_delay: Duration::from_millis(400),
            jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// The default policy with a different attempt budget.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Whether a completed response with this status should be retried.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Deterministic part of the delay after failed attempt `attempt`
    /// (1-indexed): `base * 2^(attempt-1)`.
    pub fn backoff_base(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Full delay after failed attempt `attempt` (1-indexed), in
    /// `[backoff_base, backoff_base + jitter)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let offset = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.backoff_base(attempt) + Duration::from_millis(offset)
    }
}

/// A completed attempt that carries an HTTP status code.
pub trait HttpStatus {
    fn status_code(&self) -> u16;
}

impl HttpStatus for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

/// Run `call` until it yields a non-retryable outcome or the policy's
/// attempts are spent.
///
/// Returns exactly one outcome: the first response that is not retryable,
/// or the last attempt's response or error. Dropping the returned future
/// aborts the in-flight attempt and any pending backoff sleep.
pub async fn send_with_retry<R, E, F, Fut>(
    policy: &RetryPolicy,
    handler: &dyn EventHandler,
    mut call: F,
) -> Result<R, E>
where
    R: HttpStatus,
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(response) => {
                let status = response.status_code();
                if attempt >= max_attempts || !policy.is_retryable_status(status) {
                    return Ok(response);
                }
                // Release the connection before sleeping.
                drop(response);
                backoff(policy, handler, attempt, max_attempts, &format!("HTTP {status}")).await;
            }
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(e);
                }
                backoff(policy, handler, attempt, max_attempts, &e.to_string()).await;
            }
        }
        attempt += 1;
    }
}

async fn backoff(
    policy: &RetryPolicy,
    handler: &dyn EventHandler,
    attempt: u32,
    max_attempts: u32,
    reason: &str,
) {
    let delay = policy.delay_for_attempt(attempt);
    handler.on_event(&ClientEvent::Retrying {
        attempt,
        max_attempts,
        delay,
        reason,
    });
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FnEventHandler, NoopHandler};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, PartialEq)]
    struct Stub {
        status: u16,
        tag: &'static str,
    }

    impl HttpStatus for Stub {
        fn status_code(&self) -> u16 {
            self.status
        }
    }

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            ..RetryPolicy::with_attempts(max_attempts)
        }
    }

    /// A scripted transport: each call pops the next outcome and counts.
    fn scripted(
        outcomes: Vec<Result<Stub, String>>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> futures::future::Ready<Result<Stub, String>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = Arc::new(Mutex::new(VecDeque::from(outcomes)));
        let counter = calls.clone();
        let call = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let next = queue
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more times than scripted");
            futures::future::ready(next)
        };
        (calls, call)
    }

    #[test]
    fn default_policy_matches_fixed_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(400));
        assert_eq!(policy.jitter, Duration::from_millis(200));
        for code in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(code));
        }
        for code in [200, 400, 401, 403, 404, 422] {
            assert!(!policy.is_retryable_status(code));
        }
    }

    #[test]
    fn delay_within_jittered_window() {
        let policy = RetryPolicy::default();
        for attempt in 1..=4u32 {
            let low = Duration::from_millis(400 * 2u64.pow(attempt - 1));
            let high = low + Duration::from_millis(200);
            for _ in 0..50 {
                let d = policy.delay_for_attempt(attempt);
                assert!(d >= low && d < high, "attempt {attempt}: {d:?} not in [{low:?}, {high:?})");
            }
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn retryable_status_retries_once_and_returns_second() {
        for first in [429, 500, 502, 503, 504] {
            let (calls, call) = scripted(vec![
                Ok(Stub { status: first, tag: "first" }),
                Ok(Stub { status: first, tag: "second" }),
            ]);
            let out = send_with_retry(&instant_policy(2), &NoopHandler, call).await;
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert_eq!(out.unwrap().tag, "second");
        }
    }

    #[tokio::test]
    async fn success_after_retry() {
        let (calls, call) = scripted(vec![
            Ok(Stub { status: 503, tag: "first" }),
            Ok(Stub { status: 200, tag: "second" }),
        ]);
        let out = send_with_retry(&instant_policy(2), &NoopHandler, call)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out, Stub { status: 200, tag: "second" });
    }

    #[tokio::test]
    async fn non_retryable_status_is_returned_immediately() {
        for status in [200, 400, 401, 404] {
            let (calls, call) = scripted(vec![Ok(Stub { status, tag: "only" })]);
            let out = send_with_retry(&instant_policy(2), &NoopHandler, call)
                .await
                .unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(out.status, status);
        }
    }

    #[tokio::test]
    async fn transport_error_retried_then_propagated() {
        let (calls, call) = scripted(vec![
            Err("connection reset".to_string()),
            Err("timed out".to_string()),
        ]);
        let out = send_with_retry(&instant_policy(2), &NoopHandler, call).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.unwrap_err(), "timed out");
    }

    #[tokio::test]
    async fn transport_error_then_response() {
        let (calls, call) = scripted(vec![
            Err("connection refused".to_string()),
            Ok(Stub { status: 502, tag: "second" }),
        ]);
        let out = send_with_retry(&instant_policy(2), &NoopHandler, call)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.status, 502);
    }

    #[tokio::test]
    async fn single_attempt_never_retries() {
        let (calls, call) = scripted(vec![Ok(Stub { status: 503, tag: "only" })]);
        let out = send_with_retry(&instant_policy(1), &NoopHandler, call)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.status, 503);

        // Zero is treated as one.
        let (calls, call) = scripted(vec![Err("down".to_string())]);
        let out = send_with_retry(&instant_policy(0), &NoopHandler, call).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn retry_notifies_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = FnEventHandler::new(move |event| {
            if let ClientEvent::Retrying {
                attempt,
                max_attempts,
                reason,
                ..
            } = event
            {
                sink.lock()
                    .unwrap()
                    .push(format!("{attempt}/{max_attempts} {reason}"));
            }
        });
        let (_, call) = scripted(vec![
            Ok(Stub { status: 429, tag: "first" }),
            Ok(Stub { status: 200, tag: "second" }),
        ]);
        send_with_retry(&instant_policy(2), &handler, call)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["1/2 HTTP 429".to_string()]);
    }
}
