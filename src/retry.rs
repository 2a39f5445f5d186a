//! Per-call timeout and latency tracking for `ChainProvider` calls, plus a
//! bounded exponential-backoff retry loop for transient `TrackerError`s.
//!
//! Backoff doubles each attempt up to a configured ceiling and retries
//! indefinitely rather than giving up after a fixed count: a transient error
//! should never permanently stop the tracker, only a fatal one does (see
//! `TrackerError::is_fatal`).

use std::{future::Future, time::Duration};

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::{
    error::{ProviderError, TrackerError},
    statistics::PROVIDER_CALL_LATENCY,
    syncer::CancellationToken,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Wraps a single `ChainProvider` call with `provider_timeout`, recording
/// `PROVIDER_CALL_LATENCY` and mapping an elapsed timeout into
/// `ProviderError::Timeout`.
pub async fn call_provider<Fut, T>(provider_timeout: Duration, fut: Fut) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let _timer = PROVIDER_CALL_LATENCY.start_timer();
    match timeout(provider_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    }
}

/// Retries `f` until it succeeds, the cancellation token fires, or it
/// returns a fatal `TrackerError`. Everything else is treated as transient
/// and retried after a delay that doubles each attempt, capped at
/// `ceiling`.
pub async fn retry_transient<F, Fut, T>(
    cancel: &CancellationToken,
    ceiling: Duration,
    mut f: F,
) -> Result<T, TrackerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TrackerError>>,
{
    let mut delay = INITIAL_BACKOFF;
    loop {
        cancel.check()?;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() || matches!(e, TrackerError::Cancelled) => return Err(e),
            Err(e) => {
                warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "transient error, backing off before retry"
                );
                sleep(delay).await;
                delay = (delay * 2).min(ceiling);
            }
        }
    }
}
