//! Pure reorg-plan computation.
//!
//! `Reconciler` never mutates the window or the store: it reads both
//! (through a `&dyn Store` for the removed-log lookup, a `&dyn
//! ChainProvider` for new headers/logs, and a `&BlockWindow` for the
//! current local view) and returns an `Event` for the `Dispatcher` to
//! apply atomically.

use std::time::Duration;

use tracing::{debug, info, trace};
use web3::types::H256;

use crate::{
    error::{ProviderError, TrackerError},
    filter::FilterSpec,
    model::{BlockHeader, Event, Log},
    provider::{ChainProvider, LogQuery},
    retry::call_provider,
    statistics::{BLOCKS_ADDED, BLOCKS_REMOVED, RECONCILE_LATENCY},
    store::Store,
    window::BlockWindow,
};

pub struct Reconciler<'a> {
    provider: &'a dyn ChainProvider,
    store:    &'a dyn Store,
    filter:   &'a FilterSpec,
    provider_timeout: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        provider: &'a dyn ChainProvider,
        store: &'a dyn Store,
        filter: &'a FilterSpec,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            filter,
            provider_timeout,
        }
    }

    /// Given a candidate head and the current window, produce the minimal
    /// event that extends the window to terminate at `candidate` (or
    /// further, if the forward gap walk reaches past it -- which it does
    /// not, by construction: the walk stops exactly at `candidate`).
    pub async fn reconcile(
        &self,
        window: &BlockWindow,
        candidate: BlockHeader,
    ) -> Result<Event, TrackerError> {
        let _timer = RECONCILE_LATENCY.start_timer();

        let cursor = match window.cursor() {
            // Cold window: treat the candidate as the first admitted block.
            // It bypasses the parent-link check since there's no predecessor.
            None => return self.direct_append(candidate).await,
            Some(cursor) => cursor,
        };

        // Case 1: duplicate head.
        if candidate.hash == cursor.hash {
            trace!(?candidate, "duplicate head, nothing to do");
            return Ok(Event::default());
        }

        // Case 2: already known, stale announcement.
        if candidate.number <= cursor.number && window.find_by_hash(candidate.hash).is_some() {
            trace!(?candidate, "stale announcement, already in window");
            return Ok(Event::default());
        }

        // Case 3: direct successor.
        if candidate.parent_hash == cursor.hash {
            let added_logs = self.fetch_block_logs(candidate).await?;
            info!(number = candidate.number, "admitting direct successor");
            BLOCKS_ADDED.observe(1.0);
            return Ok(Event {
                added: vec![candidate],
                removed: vec![],
                added_logs,
                removed_logs: vec![],
            });
        }

        // Case 4: forward gap. Walk forward from cursor+1, hoping to link
        // into `candidate` without ever needing to roll back.
        if candidate.number > cursor.number + 1 {
            if let Some(event) = self.try_forward_gap(cursor, candidate).await? {
                return Ok(event);
            }
            // Forward walk hit a header whose parent isn't the cursor:
            // falls through to the rollback walk below.
        }

        // Case 5: fork / rollback.
        self.rollback_and_forward(window, cursor, candidate).await
    }

    /// First block ever admitted to an empty window.
    async fn direct_append(&self, candidate: BlockHeader) -> Result<Event, TrackerError> {
        let added_logs = self.fetch_block_logs(candidate).await?;
        info!(number = candidate.number, "bootstrapping empty window");
        BLOCKS_ADDED.observe(1.0);
        Ok(Event {
            added: vec![candidate],
            removed: vec![],
            added_logs,
            removed_logs: vec![],
        })
    }

    /// Walk forward from `cursor.number + 1` to `candidate.number`,
    /// fetching each header by number. Succeeds (returns `Some`) only if
    /// the chain links contiguously all the way from the cursor into
    /// `candidate`. Returns `None` if a header is encountered whose parent
    /// is not the previous header in the walk -- signalling a fork that the
    /// caller must resolve via the backward walk instead.
    async fn try_forward_gap(
        &self,
        cursor: BlockHeader,
        candidate: BlockHeader,
    ) -> Result<Option<Event>, TrackerError> {
        let mut chain = Vec::with_capacity((candidate.number - cursor.number) as usize);
        let mut prev = cursor;
        let mut n = cursor.number + 1;
        while n < candidate.number {
            let header = call_provider(self.provider_timeout, self.provider.block_by_number(n))
                .await
                .map_err(|e| match e {
                    ProviderError::NotFound(_) => TrackerError::ProviderInconsistent,
                    other => other.into(),
                })?;
            if !header.follows(&prev) {
                debug!(number = n, "forward walk diverged from cursor, forcing rollback");
                return Ok(None);
            }
            chain.push(header);
            prev = header;
            n += 1;
        }
        if !candidate.follows(&prev) {
            debug!(
                number = candidate.number,
                "candidate does not follow forward-walked chain, forcing rollback"
            );
            return Ok(None);
        }
        chain.push(candidate);

        let mut added_logs = Vec::new();
        for block in &chain {
            added_logs.extend(self.fetch_block_logs(*block).await?);
        }
        info!(
            from = cursor.number + 1,
            to = candidate.number,
            "admitting forward gap"
        );
        BLOCKS_ADDED.observe(chain.len() as f64);
        Ok(Some(Event {
            added: chain,
            removed: vec![],
            added_logs,
            removed_logs: vec![],
        }))
    }

    /// Case 5: walk backward from the candidate's chain until a shared
    /// ancestor with the local window is found, then walk forward again to
    /// `candidate`.
    async fn rollback_and_forward(
        &self,
        window: &BlockWindow,
        cursor: BlockHeader,
        candidate: BlockHeader,
    ) -> Result<Event, TrackerError> {
        // Collect the provider's chain down to (but not including) the
        // first block whose number is <= cursor.number, since the simple
        // forward-gap case already ruled those out.
        let mut proposed = vec![candidate];
        loop {
            let oldest = *proposed.first().unwrap();
            if oldest.number <= cursor.number + 1 {
                break;
            }
            let parent = call_provider(self.provider_timeout, self.provider.block_by_hash(oldest.parent_hash))
                .await
                .map_err(|e| match e {
                    ProviderError::NotFound(_) => TrackerError::ProviderInconsistent,
                    other => other.into(),
                })?;
            if !oldest.follows(&parent) {
                return Err(TrackerError::ProviderInconsistent);
            }
            proposed.insert(0, parent);
        }

        loop {
            let oldest = *proposed.first().unwrap();
            let ancestor_number = match oldest.number.checked_sub(1) {
                Some(n) => n,
                None => return Err(TrackerError::AncestorBelowBacklog),
            };

            let canonical_ancestor = call_provider(self.provider_timeout, self.provider.block_by_number(ancestor_number))
                .await
                .map_err(|e| match e {
                    ProviderError::NotFound(_) => TrackerError::ProviderInconsistent,
                    other => other.into(),
                })?;
            match window.find_by_number(ancestor_number) {
                Some(local_ancestor) if local_ancestor.hash == canonical_ancestor.hash => {
                    return self
                        .finish_rollback(window, canonical_ancestor, proposed)
                        .await;
                }
                Some(_) => {
                    // Hashes differ: the fork runs deeper. Prepend and
                    // continue walking backward.
                    if !oldest.follows(&canonical_ancestor) {
                        return Err(TrackerError::ProviderInconsistent);
                    }
                    proposed.insert(0, canonical_ancestor);
                }
                None => {
                    // Below the oldest retained block: reorg deeper than
                    // policy permits.
                    if window.oldest().map_or(true, |o| ancestor_number < o.number) {
                        return Err(TrackerError::AncestorBelowBacklog);
                    }
                    // Shouldn't happen if find_by_number is exhaustive over
                    // the window's contiguous range, but guard anyway.
                    return Err(TrackerError::ProviderInconsistent);
                }
            }
        }
    }

    async fn finish_rollback(
        &self,
        window: &BlockWindow,
        ancestor: BlockHeader,
        added: Vec<BlockHeader>,
    ) -> Result<Event, TrackerError> {
        // `removed`: every window entry newer than the ancestor, newest
        // first.
        let removed: Vec<BlockHeader> = window
            .iter()
            .rev()
            .take_while(|h| h.number > ancestor.number)
            .copied()
            .collect();

        // Fetched one block at a time, in `removed` order (newest-first),
        // so that `removed_logs` groups by block in the same order as
        // `removed` itself.
        let mut removed_logs = Vec::new();
        for block in &removed {
            removed_logs.extend(self.logs_for_removed(&[block.hash]).await?);
        }

        let mut added_logs = Vec::new();
        for block in &added {
            added_logs.extend(self.fetch_block_logs(*block).await?);
        }

        info!(
            ancestor = ancestor.number,
            removed = removed.len(),
            added = added.len(),
            "reorg resolved"
        );
        BLOCKS_REMOVED.observe(removed.len() as f64);
        BLOCKS_ADDED.observe(added.len() as f64);

        Ok(Event {
            added,
            removed,
            added_logs,
            removed_logs,
        })
    }

    /// Logs to remove are read back from the local store, never the
    /// provider: the fork is gone from the provider's point of view.
    async fn logs_for_removed(&self, block_hashes: &[H256]) -> Result<Vec<Log>, TrackerError> {
        Ok(self.store.logs_by_block_hashes(block_hashes).await?)
    }

    /// Fetch logs for a single admitted block by hash (never by range --
    /// range queries are reserved for bulk catch-up).
    async fn fetch_block_logs(&self, block: BlockHeader) -> Result<Vec<Log>, TrackerError> {
        let logs = call_provider(
            self.provider_timeout,
            self.provider.logs(LogQuery::BlockHash {
                block_hash: block.hash,
            }),
        )
        .await?;
        Ok(logs.into_iter().filter(|l| self.filter.matches(l)).collect())
    }
}
