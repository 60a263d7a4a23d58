use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::broker::BrokerError;

/// Call a broker operation with bounded retries. Only retryable/disconnected
/// errors are retried; the backoff schedule saturates at its last element.
pub async fn call_with_retries<T, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    backoff_seconds: &[f64],
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                warn!(attempt, max_attempts, error = %e, "broker call failed, will retry");
                last_err = Some(e);
                if attempt >= max_attempts {
                    break;
                }
                let delay = backoff_seconds
                    .get(attempt as usize - 1)
                    .or(backoff_seconds.last())
                    .copied()
                    .unwrap_or(1.0);
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| BrokerError::Fatal("retries exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result = call_with_retries(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BrokerError::Retryable("flaky".into()))
                    } else {
                        Ok(7)
                    }
                }
            },
            3,
            &[0.0],
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = call_with_retries(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BrokerError::Fatal("no".into()))
                }
            },
            3,
            &[0.0],
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_then_returns_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = call_with_retries(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BrokerError::Disconnected("gone".into()))
                }
            },
            3,
            &[0.0, 0.0],
        )
        .await;
        assert!(matches!(result, Err(BrokerError::Disconnected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
