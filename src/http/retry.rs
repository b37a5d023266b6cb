//! Retry policy and the attempt loop behind every durable request.
//!
//! Each attempt ends in one of four ways: success (return), rejection
//! (return the error), a transient failure (sleep and retry), or an
//! unexpected transport error (return it without retrying).

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::RequestError;

/// Status codes a plain request treats as success.
pub const DEFAULT_SUCCESS_CODES: [StatusCode; 4] = [
    StatusCode::OK,
    StatusCode::CREATED,
    StatusCode::ACCEPTED,
    StatusCode::NO_CONTENT,
];

/// Status codes a store (POST) treats as success: created, or already there.
pub const STORE_SUCCESS_CODES: [StatusCode; 2] = [StatusCode::CREATED, StatusCode::CONFLICT];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    max_delay: Option<Duration>,
    success_codes: Vec<StatusCode>,
    cancellation: Option<CancellationToken>,
}

impl RetryPolicy {
    /// `attempts` must be at least 1 and `delay_secs` a finite, non-negative
    /// number of seconds to wait before the first retry.
    pub fn new(attempts: u32, delay_secs: f64) -> Result<Self, RequestError> {
        if attempts == 0 {
            return Err(RequestError::InvalidPolicy(
                "the value of `attempts` must be greater than 0".into(),
            ));
        }
        let delay = Duration::try_from_secs_f64(delay_secs).map_err(|_| {
            RequestError::InvalidPolicy(if delay_secs < 0.0 {
                "the value of `delay` must be greater than or equal to 0".into()
            } else {
                format!("the value of `delay` must be a finite number of seconds, got {delay_secs}")
            })
        })?;

        Ok(Self {
            attempts,
            delay,
            max_delay: None,
            success_codes: DEFAULT_SUCCESS_CODES.to_vec(),
            cancellation: None,
        })
    }

    /// Same as [`RetryPolicy::new`] with [`STORE_SUCCESS_CODES`].
    pub fn store(attempts: u32, delay_secs: f64) -> Result<Self, RequestError> {
        Ok(Self::new(attempts, delay_secs)?.with_success_codes(STORE_SUCCESS_CODES))
    }

    pub fn with_success_codes(mut self, codes: impl IntoIterator<Item = StatusCode>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn success_codes(&self) -> &[StatusCode] {
        &self.success_codes
    }

    pub fn is_success(&self, status: StatusCode) -> bool {
        self.success_codes.contains(&status)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let next = current.saturating_mul(2);
        match self.max_delay {
            Some(max) => next.min(max),
            None => next,
        }
    }
}

/// Network-level failures worth another attempt.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

/// Drive `send` until it succeeds, is rejected, or the policy runs out.
///
/// `send` receives the 1-based attempt number and must issue a fresh request
/// each time it is called.
pub async fn send_durable<F, Fut>(policy: &RetryPolicy, mut send: F) -> Result<Response, RequestError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut delay = policy.delay;

    for attempt in 1..=policy.attempts {
        if policy.is_cancelled() {
            return Err(RequestError::Cancelled);
        }

        match send(attempt).await {
            Ok(response) if response.status().is_server_error() => {
                warn!(attempt, status = response.status().as_u16(), "server error");
            }
            Ok(response) if policy.is_success(response.status()) => {
                info!(attempt, status = response.status().as_u16(), "request was successful");
                return Ok(response);
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(
                    attempt,
                    status = status.as_u16(),
                    body = %body,
                    "could not complete request due to status code"
                );
                return Err(RequestError::Rejected { status, body });
            }
            Err(err) if is_transient(&err) => {
                warn!(attempt, error = %err, "network error");
            }
            Err(err) => return Err(RequestError::Transport(err)),
        }

        if attempt < policy.attempts {
            info!(
                attempt,
                backoff_ms = delay.as_millis().min(u128::from(u64::MAX)) as u64,
                "will retry request"
            );
            sleep_with_cancellation(delay, policy.cancellation.as_ref()).await?;
            delay = policy.next_delay(delay);
        }
    }

    error!(attempts = policy.attempts, "unable to complete request");
    Err(RequestError::Exhausted {
        attempts: policy.attempts,
    })
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<(), RequestError> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(RequestError::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    fn reply(status: u16, body: &'static str) -> Response {
        let response = axum::http::Response::builder()
            .status(status)
            .body(body)
            .unwrap();
        Response::from(response)
    }

    /// A `send` closure that replays `statuses` in order and counts calls.
    fn scripted<'a>(
        statuses: &'static [u16],
        calls: &'a Cell<u32>,
    ) -> impl FnMut(u32) -> std::future::Ready<Result<Response, reqwest::Error>> + 'a {
        move |attempt| {
            calls.set(calls.get() + 1);
            assert_eq!(attempt, calls.get());
            let idx = (attempt as usize - 1).min(statuses.len() - 1);
            std::future::ready(Ok(reply(statuses[idx], "payload")))
        }
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = RetryPolicy::new(0, 1.0).unwrap_err();
        assert!(matches!(err, RequestError::InvalidPolicy(ref m) if m.contains("attempts")));
    }

    #[test]
    fn negative_delay_rejected() {
        let err = RetryPolicy::new(3, -1.0).unwrap_err();
        assert!(matches!(err, RequestError::InvalidPolicy(ref m) if m.contains("delay")));
        assert!(RetryPolicy::new(3, f64::NAN).is_err());
    }

    #[test]
    fn oversized_delay_reports_finite_bound() {
        for delay in [1e300, f64::INFINITY] {
            let err = RetryPolicy::new(3, delay).unwrap_err();
            assert!(
                matches!(err, RequestError::InvalidPolicy(ref m) if m.contains("finite number of seconds")),
                "{delay}: {err}"
            );
        }
    }

    #[test]
    fn default_and_store_codes() {
        let plain = RetryPolicy::new(1, 0.0).unwrap();
        assert_eq!(plain.success_codes(), &DEFAULT_SUCCESS_CODES);
        assert!(!plain.is_success(StatusCode::CONFLICT));

        let store = RetryPolicy::store(1, 0.0).unwrap();
        assert!(store.is_success(StatusCode::CONFLICT));
        assert!(store.is_success(StatusCode::CREATED));
        assert!(!store.is_success(StatusCode::OK));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 1.0)
            .unwrap()
            .with_max_delay(Duration::from_secs(3));
        assert_eq!(policy.next_delay(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(policy.next_delay(Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(policy.next_delay(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, 2.0).unwrap().with_success_codes([StatusCode::OK]);
        let response = send_durable(&policy, scripted(&[200], &calls)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "payload");
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn single_server_error_exhausts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(1, 5.0).unwrap();
        let err = send_durable(&policy, scripted(&[504], &calls)).await.unwrap_err();
        assert!(matches!(err, RequestError::Exhausted { attempts: 1 }));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_server_errors_with_doubling_delay() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, 1.0).unwrap();
        let started = Instant::now();
        let response = send_durable(&policy, scripted(&[504, 503, 201], &calls))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(calls.get(), 3);
        // 1s before the second attempt, 2s before the third.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3), "waited {waited:?}");
        assert!(waited < Duration::from_secs(4), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn max_delay_caps_retry_waits() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(4, 1.0)
            .unwrap()
            .with_max_delay(Duration::from_secs(1));
        let started = Instant::now();
        let response = send_durable(&policy, scripted(&[503, 503, 503, 200], &calls))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.get(), 4);
        // Three 1s waits; uncapped doubling would take 7s.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3), "waited {waited:?}");
        assert!(waited < Duration::from_secs(4), "waited {waited:?}");
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, 0.0).unwrap();
        let err = send_durable(&policy, scripted(&[400, 200], &calls)).await.unwrap_err();
        match err {
            RequestError::Rejected { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "payload");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn conflict_is_success_for_store_policy() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::store(3, 0.0).unwrap();
        let response = send_durable(&policy, scripted(&[409], &calls)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let calls = Cell::new(0);
        let token = CancellationToken::new();
        token.cancel();
        let policy = RetryPolicy::new(3, 0.0).unwrap().with_cancellation(token);
        let err = send_durable(&policy, scripted(&[200], &calls)).await.unwrap_err();
        assert!(matches!(err, RequestError::Cancelled));
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let calls = Cell::new(0);
        let token = CancellationToken::new();
        let policy = RetryPolicy::new(3, 60.0)
            .unwrap()
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = send_durable(&policy, scripted(&[503], &calls)).await.unwrap_err();
        assert!(matches!(err, RequestError::Cancelled));
        assert_eq!(calls.get(), 1);
        canceller.await.unwrap();
    }
}
