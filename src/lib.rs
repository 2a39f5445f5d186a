//! Tracks a remote chain's block headers and logs through reorgs,
//! publishing a single ordered stream of add/remove events.
//!
//! The data flow is `ChainProvider -> { Syncer | Poller } -> Dispatcher ->
//! Reconciler`: the `Dispatcher` is the sole writer of the local window,
//! the `Reconciler` is the pure function that turns a candidate head into
//! a committed `Event`, and the `Syncer`/`Poller` are the two producers of
//! candidate heads (bulk catch-up and steady-state polling respectively).

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod logging;
pub mod model;
pub mod provider;
pub mod reconciler;
pub mod retry;
pub mod shutdown;
pub mod statistics;
pub mod store;
pub mod syncer;
pub mod poller;
pub mod window;

/// In-memory `Store`/`ChainProvider` doubles, exported unconditionally so
/// both this crate's own tests and an embedding binary's integration tests
/// can drive the tracker without a live chain connection.
pub mod testing;

use std::sync::Arc;

use anyhow::{Context as _, Result as AnyResult};
use futures::{Stream, StreamExt};
use tokio::{spawn, sync::broadcast::Receiver};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{error, warn};

use config::TrackerConfig;
use dispatcher::Dispatcher;
use filter::FilterSpec;
use model::Event;
use provider::ChainProvider;
use store::Store;
use syncer::{CancellationToken, Syncer};

/// Spawns the full tracker (dispatcher, initial sync, and steady-state
/// polling) and returns a receiver for its committed events.
pub async fn start<P, S>(
    provider: Arc<P>,
    store: Arc<S>,
    filter: FilterSpec,
    config: TrackerConfig,
) -> AnyResult<(Receiver<Event>, CancellationToken)>
where
    P: ChainProvider + 'static,
    S: Store + 'static,
{
    let dispatcher = Dispatcher::new(
        provider.clone(),
        store,
        filter.clone(),
        config.max_backlog,
        config.provider_timeout,
        config.queue_capacity,
        config.event_channel_capacity,
    )
    .await
    .context("failed to initialize dispatcher")?;

    let events = dispatcher.subscribe();
    let handle = dispatcher.handle();
    let cancel = CancellationToken::new();

    spawn(async move {
        if let Err(error) = dispatcher.run().await {
            error!(%error, "dispatcher terminated");
        }
    });

    let syncer = Syncer::new(provider.clone(), handle.clone(), filter, config.clone());
    let sync_cancel = cancel.clone();
    let poller_config = config.clone();
    spawn(async move {
        if let Err(error) = syncer.sync(&sync_cancel).await {
            error!(%error, "initial sync failed");
            return;
        }
        let poller = poller::Poller::new(provider, handle, poller_config);
        if let Err(error) = poller.run(&sync_cancel).await {
            error!(%error, "polling driver terminated");
        }
    });

    Ok((events, cancel))
}

/// Adapts a raw broadcast [`Receiver`] into a [`Stream`] of `Event`s,
/// dropping (and logging) any lag gap a slow consumer fell into rather than
/// surfacing `BroadcastStreamRecvError` to callers who just want the log
/// feed.
pub fn into_stream(receiver: Receiver<Event>) -> impl Stream<Item = Event> {
    BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged, dropping skipped events");
                None
            }
        }
    })
}
