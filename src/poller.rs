//! Steady-state polling driver: once `Syncer::sync` has caught up,
//! this periodically probes `head_number` and submits new candidates to the
//! `Dispatcher`.

use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::{
    config::TrackerConfig,
    dispatcher::DispatcherHandle,
    error::TrackerError,
    model::BlockNumber,
    provider::ChainProvider,
    retry::{call_provider, retry_transient},
    syncer::CancellationToken,
};

pub struct Poller<P> {
    provider: Arc<P>,
    dispatcher: DispatcherHandle,
    config: TrackerConfig,
}

impl<P: ChainProvider + 'static> Poller<P> {
    pub fn new(provider: Arc<P>, dispatcher: DispatcherHandle, config: TrackerConfig) -> Self {
        Self {
            provider,
            dispatcher,
            config,
        }
    }

    /// Runs until cancelled or a fatal `TrackerError` bubbles back from the
    /// dispatcher. A transient failure at any step (a missed `head_number`
    /// poll, a momentarily unavailable store) is retried in place with
    /// exponential backoff rather than silently waiting out the next tick.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), TrackerError> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_observed: Option<BlockNumber> = self.dispatcher.cursor_number().await;

        loop {
            ticker.tick().await;
            if cancel.is_cancelled() {
                return Ok(());
            }

            let head = match self.head_number(cancel).await {
                Ok(head) => head,
                Err(TrackerError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            // A head that hasn't advanced past what we've already submitted
            // carries no new information: ignore it rather than resubmit
            // the same candidate (open question, resolved in this crate's
            // favor of "strictly greater than").
            if last_observed.map_or(false, |last| head <= last) {
                debug!(head, ?last_observed, "head has not advanced, skipping");
                continue;
            }

            let header = match self.block_by_number(cancel, head).await {
                Ok(header) => header,
                Err(TrackerError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            let submitted = retry_transient(cancel, self.config.retry_backoff_ceiling, || {
                self.dispatcher.submit_candidate(header)
            })
            .await;
            match submitted {
                Ok(()) => last_observed = Some(head),
                Err(TrackerError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn head_number(&self, cancel: &CancellationToken) -> Result<BlockNumber, TrackerError> {
        retry_transient(cancel, self.config.retry_backoff_ceiling, || async {
            call_provider(self.config.provider_timeout, self.provider.head_number())
                .await
                .map_err(TrackerError::from)
        })
        .await
    }

    async fn block_by_number(
        &self,
        cancel: &CancellationToken,
        number: BlockNumber,
    ) -> Result<crate::model::BlockHeader, TrackerError> {
        retry_transient(cancel, self.config.retry_backoff_ceiling, || async {
            call_provider(self.config.provider_timeout, self.provider.block_by_number(number))
                .await
                .map_err(TrackerError::from)
        })
        .await
    }
}
