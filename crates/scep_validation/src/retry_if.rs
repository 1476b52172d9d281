// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use again::RetryPolicy;
use futures::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ScepValidationError;

/// Build the transport retry policy described by `config`.
///
/// `again` counts *retries*, our config counts *attempts*, hence the `- 1`.
pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    let max_retries = config.max_attempts.saturating_sub(1) as usize;
    RetryPolicy::exponential(config.initial_backoff)
        .with_backoff_exponent(config.backoff_exponent)
        .with_max_retries(max_retries)
        .with_max_delay(config.max_backoff)
        .with_jitter(config.jitter)
}

/// Add a timeout of `duration` to the given future.
/// If the timeout is exceeded, a retriable `ScepValidationError::Transport` is
/// returned, for which `is_timeout()` holds.
pub async fn with_timeout<F, Value>(duration: Duration, future: F) -> Result<Value, ScepValidationError>
where
    F: Future<Output = Result<Value, ScepValidationError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(elapsed) => Err(ScepValidationError::timed_out(duration, elapsed)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::instant::get_now;

    fn fast_retries(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_exponent: 2.0,
            jitter: false,
        }
    }

    fn connection_refused() -> ScepValidationError {
        ScepValidationError::from_http(
            "posting",
            http_client::HttpError::RequestError {
                ctx: "requesting https://fef.example.com".into(),
                status: None,
                retriable: true,
                source: "connection refused".into(),
            },
        )
    }

    #[tokio::test]
    async fn timeout_error_works() {
        let start = get_now();

        let r = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        let elapsed = start.elapsed();

        assert!(r.is_retriable());
        assert!(r.is_timeout());
        assert!(r.to_string().contains("waiting 1.000s"), "{r}");
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn timeout_success_works() {
        let start = get_now();

        with_timeout(Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        })
        .await
        .unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn policy_makes_exactly_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), ScepValidationError> = retry_policy(&fast_retries(3))
            .retry_if(
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(connection_refused())
                },
                |e: &ScepValidationError| e.is_retriable(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn policy_stops_on_non_retriable_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), ScepValidationError> = retry_policy(&fast_retries(5))
            .retry_if(
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ScepValidationError::MalformedResponse {
                        reason: "nope".into(),
                    })
                },
                |e: &ScepValidationError| e.is_retriable(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_config_never_retries() {
        let attempts = AtomicU32::new(0);
        let _ = retry_policy(&fast_retries(1))
            .retry_if(
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(connection_refused())
                },
                |e: &ScepValidationError| e.is_retriable(),
            )
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
