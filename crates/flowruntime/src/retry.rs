use flowcore::{AdapterError, NodeOutput, RetryPolicy};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Final result of driving an adapter through its retry policy
#[derive(Debug)]
pub struct Attempted {
    pub result: Result<NodeOutput, AttemptError>,
    pub attempts: u32,
    pub duration: Duration,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("{0}")]
    Adapter(AdapterError),

    #[error("Cancelled")]
    Cancelled,
}

/// Invokes `call` until it succeeds, fails permanently, or the policy runs
/// out of attempts. Each attempt is bounded by `limit`; expiry counts as a
/// transient failure. `on_retry` is told about every scheduled retry.
pub async fn call_with_retry<F, Fut, R>(
    policy: &RetryPolicy,
    limit: Duration,
    cancellation: &CancellationToken,
    mut on_retry: R,
    mut call: F,
) -> Attempted
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<NodeOutput, AdapterError>>,
    R: FnMut(u32, Duration, &AdapterError),
{
    let max_attempts = policy.max_attempts.max(1);
    let started = Instant::now();
    let mut attempt = 1u32;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(AttemptError::Cancelled),
            res = timeout(limit, call(attempt)) => match res {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(AttemptError::Adapter(e)),
                Err(_) => Err(AttemptError::Adapter(AdapterError::timeout(limit.as_millis() as u64))),
            },
        };

        let error = match outcome {
            Err(AttemptError::Adapter(e)) if e.transient && attempt < max_attempts => e,
            result => {
                return Attempted {
                    result,
                    attempts: attempt,
                    duration: started.elapsed(),
                }
            }
        };

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            "Attempt {}/{} failed: {}. Retrying in {}ms",
            attempt,
            max_attempts,
            error,
            delay.as_millis()
        );
        on_retry(attempt, delay, &error);

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Attempted {
                    result: Err(AttemptError::Cancelled),
                    attempts: attempt,
                    duration: started.elapsed(),
                };
            }
            _ = sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }
}
