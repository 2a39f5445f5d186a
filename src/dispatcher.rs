//! The single writer: owns the window, serializes every mutation
//! through one command loop, and publishes committed `Event`s on a
//! broadcast channel with back-pressure.

use std::{sync::Arc, time::Duration};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

use crate::{
    error::{ProviderError, TrackerError},
    filter::FilterSpec,
    model::{BlockHeader, BlockNumber, Event, Log},
    provider::ChainProvider,
    reconciler::Reconciler,
    retry::call_provider,
    statistics::{CANDIDATES_RECEIVED, FATAL_ERRORS},
    store::Store,
    window::BlockWindow,
};

enum Command {
    /// Fetch the header at `number` from the provider, then reconcile.
    SubmitByNumber(BlockNumber, oneshot::Sender<Result<(), TrackerError>>),
    /// Reconcile a header already in hand (the steady-state polling path).
    SubmitCandidate(BlockHeader, oneshot::Sender<Result<(), TrackerError>>),
    /// Admit a contiguous run of headers with their logs already fetched
    /// and partitioned, skipping the reconciler's own log lookup (the bulk
    /// catch-up path). Committed and published as a single `Event`.
    SubmitAdmit(Vec<BlockHeader>, Vec<Log>, oneshot::Sender<Result<(), TrackerError>>),
    CursorNumber(oneshot::Sender<Option<BlockNumber>>),
    Cursor(oneshot::Sender<Option<BlockHeader>>),
}

/// A cheap, cloneable front for the dispatcher's command queue. `Syncer` and
/// the polling driver both hold one; neither ever touches the window
/// directly.
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    pub async fn submit_by_number(&self, number: BlockNumber) -> Result<(), TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SubmitByNumber(number, tx)).await?;
        rx.await.map_err(|_| TrackerError::Cancelled)?
    }

    pub async fn submit_candidate(&self, header: BlockHeader) -> Result<(), TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SubmitCandidate(header, tx)).await?;
        rx.await.map_err(|_| TrackerError::Cancelled)?
    }

    pub async fn submit_admit(
        &self,
        headers: Vec<BlockHeader>,
        logs: Vec<Log>,
    ) -> Result<(), TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SubmitAdmit(headers, logs, tx)).await?;
        rx.await.map_err(|_| TrackerError::Cancelled)?
    }

    pub async fn cursor_number(&self) -> Option<BlockNumber> {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::CursorNumber(tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn cursor(&self) -> Option<BlockHeader> {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Cursor(tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TrackerError::Cancelled)
    }
}

/// Owns the window and drives it to completion via `run`. Construct with
/// [`Dispatcher::new`], take the [`DispatcherHandle`] with
/// [`Dispatcher::handle`], and the event receiver with
/// [`Dispatcher::subscribe`], then spawn [`Dispatcher::run`].
pub struct Dispatcher<P, S> {
    window: BlockWindow,
    provider: Arc<P>,
    store: Arc<S>,
    filter: FilterSpec,
    provider_timeout: Duration,
    events: broadcast::Sender<Event>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl<P, S> Dispatcher<P, S>
where
    P: ChainProvider + 'static,
    S: Store + 'static,
{
    pub async fn new(
        provider: Arc<P>,
        store: Arc<S>,
        filter: FilterSpec,
        max_backlog: usize,
        provider_timeout: Duration,
        queue_capacity: usize,
        event_channel_capacity: usize,
    ) -> Result<Self, TrackerError> {
        let window = match store.load_window().await? {
            Some(entries) => BlockWindow::from_snapshot(entries, max_backlog),
            None => BlockWindow::new(max_backlog),
        };
        let (commands_tx, commands_rx) = mpsc::channel(queue_capacity);
        let (events, _) = broadcast::channel(event_channel_capacity);
        Ok(Self {
            window,
            provider,
            store,
            filter,
            provider_timeout,
            events,
            commands_tx,
            commands_rx,
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            commands: self.commands_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The command loop. Runs until every `DispatcherHandle` is dropped, or
    /// a fatal `TrackerError` is returned.
    pub async fn run(mut self) -> Result<(), TrackerError> {
        while let Some(command) = self.commands_rx.recv().await {
            match command {
                Command::SubmitByNumber(number, reply) => {
                    let result = self.handle_by_number(number).await;
                    let fatal = result.as_ref().err().filter(|e| e.is_fatal()).cloned();
                    let _ = reply.send(result);
                    if let Some(e) = fatal {
                        FATAL_ERRORS.inc();
                        error!(error = %e, "fatal tracker error, halting");
                        return Err(e);
                    }
                }
                Command::SubmitCandidate(header, reply) => {
                    CANDIDATES_RECEIVED.inc();
                    let result = self.apply_reconcile(header).await;
                    let fatal = result.as_ref().err().filter(|e| e.is_fatal()).cloned();
                    let _ = reply.send(result);
                    if let Some(e) = fatal {
                        FATAL_ERRORS.inc();
                        error!(error = %e, "fatal tracker error, halting");
                        return Err(e);
                    }
                }
                Command::SubmitAdmit(headers, logs, reply) => {
                    let result = self.apply_direct(headers, logs).await;
                    let fatal = result.as_ref().err().filter(|e| e.is_fatal()).cloned();
                    let _ = reply.send(result);
                    if let Some(e) = fatal {
                        FATAL_ERRORS.inc();
                        error!(error = %e, "fatal tracker error, halting");
                        return Err(e);
                    }
                }
                Command::CursorNumber(reply) => {
                    let _ = reply.send(self.window.cursor().map(|h| h.number));
                }
                Command::Cursor(reply) => {
                    let _ = reply.send(self.window.cursor());
                }
            }
        }
        Ok(())
    }

    async fn handle_by_number(&mut self, number: BlockNumber) -> Result<(), TrackerError> {
        let header = match call_provider(self.provider_timeout, self.provider.block_by_number(number)).await {
            Ok(h) => h,
            Err(ProviderError::NotFound(_)) => {
                warn!(number, "provider does not have requested block yet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.apply_reconcile(header).await
    }

    /// Full reorg-aware reconciliation path: `Reconciler` computes the
    /// event, `apply_event` commits it.
    async fn apply_reconcile(&mut self, candidate: BlockHeader) -> Result<(), TrackerError> {
        let reconciler = Reconciler::new(
            self.provider.as_ref(),
            self.store.as_ref(),
            &self.filter,
            self.provider_timeout,
        );
        let event = reconciler.reconcile(&self.window, candidate).await?;
        self.apply_event(event).await
    }

    /// Fast path for bulk catch-up: the caller has already fetched `headers`
    /// (a contiguous run) and their matching logs, and has already
    /// established that the run follows the window's cursor (the `Syncer`
    /// walks in strict number order). `BlockWindow::append`'s own adjacency
    /// check is the backstop. Committed and published as a single `Event`.
    async fn apply_direct(&mut self, headers: Vec<BlockHeader>, logs: Vec<Log>) -> Result<(), TrackerError> {
        if headers.is_empty() {
            return Ok(());
        }
        let event = Event {
            added: headers,
            removed: vec![],
            added_logs: logs,
            removed_logs: vec![],
        };
        self.apply_event(event).await
    }

    /// Commit an `Event`: remove, then append, then persist, in that order
    /// (remove, then add, then persist), then publish.
    async fn apply_event(&mut self, event: Event) -> Result<(), TrackerError> {
        if event.is_empty() {
            return Ok(());
        }

        if !event.removed.is_empty() {
            self.store
                .remove_logs_by_block_hashes(
                    &event.removed.iter().map(|h| h.hash).collect::<Vec<_>>(),
                )
                .await?;
            for _ in &event.removed {
                self.window.pop_back().map_err(|_| TrackerError::ProviderInconsistent)?;
            }
        }

        for header in &event.added {
            self.window
                .append(*header)
                .map_err(|_| TrackerError::ProviderInconsistent)?;
        }

        if !event.added_logs.is_empty() {
            self.store.append_logs(&event.added_logs).await?;
        }
        self.store.save_window(&self.window.snapshot()).await?;

        info!(
            added = event.added.len(),
            removed = event.removed.len(),
            "committed event"
        );

        // Back-pressure: a full channel means a slow/gone subscriber; the
        // broadcast channel itself drops the oldest entry rather than
        // blocking the writer, matching tokio::sync::broadcast semantics.
        if self.events.send(event).is_err() {
            warn!("no subscribers listening for committed events");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;
    use crate::testing::{InMemoryStore, ScriptedProvider};

    #[tokio::test]
    #[traced_test]
    async fn admitting_a_block_logs_and_publishes() {
        let provider = Arc::new(ScriptedProvider::new());
        let store = Arc::new(InMemoryStore::new());
        let header = BlockHeader {
            hash: web3::types::H256::from_low_u64_be(1),
            number: 1,
            parent_hash: web3::types::H256::zero(),
        };
        provider.set_block(header, vec![]);

        let dispatcher = Dispatcher::new(
            provider.clone(),
            store.clone(),
            FilterSpec::match_all(),
            64,
            std::time::Duration::from_secs(1),
            8,
            8,
        )
        .await
        .unwrap();
        let mut events = dispatcher.subscribe();
        let handle = dispatcher.handle();
        tokio::spawn(dispatcher.run());

        handle.submit_candidate(header).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.added, vec![header]);
        assert!(logs_contain("committed event"));
    }
}
