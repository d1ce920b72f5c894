//! Bounded polling of collaborators that answer "not yet".

use std::future::Future;

use pipeline::{PollPolicy, WorkflowError};
use tracing::{debug, warn};

/// Outcome of [`poll_until`].
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The check produced a value.
    Ready(T),
    /// Every attempt answered "not yet" or failed transiently.
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Repeatedly runs `check` on the schedule described by `policy`.
///
/// - `Ok(Some(value))` ends polling with [`PollOutcome::Ready`].
/// - `Ok(None)` and retryable errors consume an attempt and wait.
/// - Non-retryable errors are returned immediately.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    what: &str,
    mut check: F,
) -> Result<PollOutcome<T>, WorkflowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, WorkflowError>>,
{
    for attempt in 0..policy.max_attempts() {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match check().await {
            Ok(Some(value)) => return Ok(PollOutcome::Ready(value)),
            Ok(None) => debug!(attempt = attempt + 1, "{what} not ready yet"),
            Err(err) if err.retry_policy().is_retryable() => {
                warn!(attempt = attempt + 1, error = %err, "{what} check failed, retrying");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(PollOutcome::Exhausted {
        attempts: policy.max_attempts(),
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use pipeline::Upstream;

    use super::*;

    fn immediate(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::ZERO, Duration::ZERO, max_attempts).unwrap()
    }

    #[tokio::test]
    async fn returns_first_ready_value() {
        let calls = &AtomicU32::new(0);
        let outcome = poll_until(immediate(5), "proof", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(if n == 2 { Some(n) } else { None })
        })
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Ready(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_errors_consume_attempts() {
        let calls = &AtomicU32::new(0);
        let outcome: PollOutcome<()> = poll_until(immediate(3), "proof", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkflowError::transient(Upstream::DataAvailability, "timeout"))
        })
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Exhausted { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_stop_polling() {
        let calls = &AtomicU32::new(0);
        let result: Result<PollOutcome<()>, _> =
            poll_until(immediate(10), "proof", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WorkflowError::permanent(Upstream::DataAvailability, "HTTP 401"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
