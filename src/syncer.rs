//! Cold-start and catch-up synchronization.
//!
//! `Syncer` does not touch the window or store directly; it drives the
//! `Dispatcher`'s candidate queue, the same way `Poller` does, so that all
//! window/store mutation still goes through the single writer. Transient
//! provider/dispatcher errors are retried here with backoff; only a fatal
//! `TrackerError` or cancellation ever escapes `sync`.

use std::{cmp::min, sync::atomic::{AtomicBool, Ordering}, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    config::TrackerConfig,
    dispatcher::DispatcherHandle,
    error::{ProviderError, TrackerError},
    filter::FilterSpec,
    model::BlockNumber,
    provider::{ChainProvider, LogQuery},
    retry::{call_provider, retry_transient},
    statistics::{RANGE_TOO_LARGE, SYNC_BATCH_SIZE},
};

/// Checked at every provider-call boundary.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), TrackerError> {
        if self.is_cancelled() {
            Err(TrackerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub struct Syncer<P> {
    provider: Arc<P>,
    dispatcher: DispatcherHandle,
    filter: FilterSpec,
    config: TrackerConfig,
}

impl<P: ChainProvider + 'static> Syncer<P> {
    pub fn new(
        provider: Arc<P>,
        dispatcher: DispatcherHandle,
        filter: FilterSpec,
        config: TrackerConfig,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            filter,
            config,
        }
    }

    /// Bring the local window up to the provider's current head.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<(), TrackerError> {
        self.preflight(cancel).await?;

        let mut batch_size = self.config.batch_size;
        loop {
            cancel.check()?;
            let head = self.head_number(cancel).await?;
            let cursor_number = self.dispatcher.cursor_number().await;

            let Some(cursor_number) = cursor_number else {
                // Store empty: bootstrap from StartBlock or head - MaxBacklog + 1.
                let start = self.config.bootstrap_start(head);
                info!(start, head, "bootstrapping empty window");
                retry_transient(cancel, self.config.retry_backoff_ceiling, || {
                    self.dispatcher.submit_by_number(start)
                })
                .await?;
                continue;
            };

            if head <= cursor_number {
                debug!(head, cursor_number, "caught up to provider head");
                return Ok(());
            }

            let from = cursor_number + 1;
            let to = min(from + batch_size as u64 - 1, head);

            match self.catch_up_range(cancel, from, to, &mut batch_size).await {
                Ok(()) => continue,
                Err(CatchUpAbort) => {
                    // Mid-range divergence or a provider call that kept
                    // failing: fall through to single-step reconciliation
                    // against the current head, which will trigger the
                    // Reconciler's reorg handling. Retried with backoff,
                    // since the underlying cause may well be transient.
                    warn!(from, to, "catch-up range abandoned, falling back to single step");
                    retry_transient(cancel, self.config.retry_backoff_ceiling, || {
                        self.dispatcher.submit_by_number(head)
                    })
                    .await?;
                }
            }
        }
    }

    /// `head_number`, wrapped in the per-call timeout and retried with
    /// backoff on anything but a fatal error or cancellation.
    async fn head_number(&self, cancel: &CancellationToken) -> Result<BlockNumber, TrackerError> {
        retry_transient(cancel, self.config.retry_backoff_ceiling, || async {
            call_provider(self.config.provider_timeout, self.provider.head_number())
                .await
                .map_err(TrackerError::from)
        })
        .await
    }

    /// Preflight check: detect a provider that silently rewrote a block this
    /// tracker considers finalized.
    async fn preflight(&self, cancel: &CancellationToken) -> Result<(), TrackerError> {
        cancel.check()?;
        let Some(cursor) = self.dispatcher.cursor().await else {
            return Ok(());
        };
        let head = self.head_number(cancel).await?;
        let canonical = retry_transient(cancel, self.config.retry_backoff_ceiling, || async {
            match call_provider(
                self.config.provider_timeout,
                self.provider.block_by_number(cursor.number),
            )
            .await
            {
                Ok(header) => Ok(Some(header)),
                Err(ProviderError::NotFound(_)) => Ok(None),
                Err(e) => Err(TrackerError::from(e)),
            }
        })
        .await?;
        let Some(canonical) = canonical else {
            return Ok(());
        };
        if canonical.hash != cursor.hash {
            let backlog = self.config.max_backlog as u64;
            if head.saturating_sub(cursor.number) > backlog {
                return Err(TrackerError::ProviderRewroteFinalized);
            }
            // Shallow disagreement: handled as a normal fork by the next
            // reconcile, not a preflight failure.
        }
        Ok(())
    }

    /// Bulk-fetch logs for `[from, to]`, halving `batch_size` on
    /// `RangeTooLarge` down to a floor of 1, then fetch each header in the
    /// range and submit the whole contiguous run as a single admitted
    /// batch, so the `Dispatcher` commits and publishes one `Event` per
    /// range instead of one per block.
    async fn catch_up_range(
        &self,
        cancel: &CancellationToken,
        from: BlockNumber,
        to: BlockNumber,
        batch_size: &mut usize,
    ) -> Result<(), CatchUpAbort> {
        cancel.check().map_err(|_| CatchUpAbort)?;

        let mut lo = from;
        let mut hi = to;
        let original_batch_size = *batch_size;
        let logs = loop {
            SYNC_BATCH_SIZE.observe((hi - lo + 1) as f64);
            match call_provider(
                self.config.provider_timeout,
                self.provider.logs(LogQuery::Range {
                    from: lo,
                    to: hi,
                    addresses: self.filter.addresses().iter().copied().collect(),
                    topics: self
                        .filter
                        .topics()
                        .iter()
                        .map(|t| t.as_ref().map(|set| set.iter().copied().collect()))
                        .collect(),
                }),
            )
            .await
            {
                Ok(logs) => break logs,
                Err(ProviderError::RangeTooLarge) => {
                    RANGE_TOO_LARGE.inc();
                    if *batch_size <= 1 {
                        return Err(CatchUpAbort);
                    }
                    *batch_size = (*batch_size / 2).max(1);
                    hi = min(lo + *batch_size as u64 - 1, hi);
                    debug!(new_batch_size = *batch_size, "halving sync batch size");
                }
                Err(_) => return Err(CatchUpAbort),
            }
        };
        if *batch_size < original_batch_size {
            // Restore after a successful smaller request.
            *batch_size = original_batch_size;
        }

        let filtered: Vec<_> = logs.into_iter().filter(|l| self.filter.matches(l)).collect();

        let mut headers = Vec::with_capacity((hi - lo + 1) as usize);
        for number in lo..=hi {
            cancel.check().map_err(|_| CatchUpAbort)?;
            let header = match call_provider(self.config.provider_timeout, self.provider.block_by_number(number))
                .await
            {
                Ok(h) => h,
                Err(_) => return Err(CatchUpAbort),
            };
            headers.push(header);
        }

        let mut added_logs = Vec::with_capacity(filtered.len());
        for header in &headers {
            added_logs.extend(filtered.iter().filter(|l| l.block_hash == header.hash).cloned());
        }

        if self
            .dispatcher
            .submit_admit(headers, added_logs)
            .await
            .is_err()
        {
            return Err(CatchUpAbort);
        }
        Ok(())
    }
}

/// Sentinel signalling the bulk range must be abandoned in favor of the
/// single-step reorg path.
struct CatchUpAbort;
