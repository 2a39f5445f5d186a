//! The six literal end-to-end scenarios, run against the in-memory
//! `Store`/`ChainProvider` doubles.

use pretty_assertions::assert_eq;

use chain_tracker::{
    error::TrackerError,
    filter::FilterSpec,
    model::{BlockHeader, Log},
    provider::ChainProvider,
    reconciler::Reconciler,
    store::Store,
    testing::{InMemoryStore, ScriptedProvider},
    window::BlockWindow,
};
use web3::types::{Bytes, H256};

fn h(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

fn header(number: u64, hash: u64, parent: u64) -> BlockHeader {
    BlockHeader {
        hash: h(hash),
        number,
        parent_hash: h(parent),
    }
}

fn log(block: &BlockHeader, data: u8) -> Log {
    Log {
        block_hash: block.hash,
        block_number: block.number,
        address: Default::default(),
        topics: vec![],
        data: Bytes(vec![data]),
        index_in_block: 0,
    }
}

async fn reconcile(
    provider: &ScriptedProvider,
    store: &InMemoryStore,
    window: &BlockWindow,
    candidate: BlockHeader,
) -> Result<chain_tracker::model::Event, TrackerError> {
    let filter = FilterSpec::match_all();
    Reconciler::new(provider, store, &filter, std::time::Duration::from_secs(1))
        .reconcile(window, candidate)
        .await
}

#[tokio::test]
async fn scenario_1_empty_history_direct_append() {
    let provider = ScriptedProvider::new();
    let store = InMemoryStore::new();
    let window = BlockWindow::new(64);

    let b1 = header(1, 1, 0);
    provider.set_block(b1, vec![log(&b1, 0x01)]);

    let event = reconcile(&provider, &store, &window, b1).await.unwrap();
    assert_eq!(event.added, vec![b1]);
    assert!(event.removed.is_empty());
    assert_eq!(event.added_logs.len(), 1);
    assert_eq!(event.added_logs[0].data, Bytes(vec![0x01]));
}

#[tokio::test]
async fn scenario_2_duplicate_head() {
    let provider = ScriptedProvider::new();
    let store = InMemoryStore::new();
    let b1 = header(1, 1, 0);
    provider.set_block(b1, vec![]);
    let mut window = BlockWindow::new(64);
    window.append(b1).unwrap();

    let event = reconcile(&provider, &store, &window, b1).await.unwrap();
    assert!(event.is_empty());
}

#[tokio::test]
async fn scenario_3_multi_block_rollback() {
    let provider = ScriptedProvider::new();
    let store = InMemoryStore::new();

    let b1 = header(1, 1, 0);
    let b2 = header(2, 2, 1);
    let b3 = header(3, 3, 2);
    let b4 = header(4, 4, 3);
    let mut window = BlockWindow::new(64);
    for b in [b1, b2, b3, b4] {
        window.append(b).unwrap();
    }
    store.append_logs(&[log(&b3, 0x3), log(&b4, 0x4)]).await.unwrap();

    provider.set_block(b1, vec![]);
    provider.set_block(b2, vec![]);
    let b3p = header(3, 30, 2);
    provider.set_block(b3p, vec![log(&b3p, 0x30)]);

    let event = reconcile(&provider, &store, &window, b3p).await.unwrap();
    assert_eq!(event.added, vec![b3p]);
    assert_eq!(event.removed, vec![b4, b3]);
    assert_eq!(event.added_logs.iter().map(|l| l.data.0[0]).collect::<Vec<_>>(), vec![0x30]);
    assert_eq!(event.removed_logs.iter().map(|l| l.data.0[0]).collect::<Vec<_>>(), vec![0x4, 0x3]);
}

#[tokio::test]
async fn scenario_4_forward_gap_backfill() {
    let provider = ScriptedProvider::new();
    let store = InMemoryStore::new();

    let b1 = header(1, 1, 0);
    let b2 = header(2, 2, 1);
    let mut window = BlockWindow::new(64);
    window.append(b1).unwrap();
    window.append(b2).unwrap();
    store.append_logs(&[log(&b1, 0x1)]).await.unwrap();

    let b3 = header(3, 3, 2);
    let b4 = header(4, 4, 3);
    let b5 = header(5, 5, 4);
    provider.set_block(b3, vec![]);
    provider.set_block(b4, vec![log(&b4, 0x2)]);
    provider.set_block(b5, vec![log(&b5, 0x3)]);

    let event = reconcile(&provider, &store, &window, b5).await.unwrap();
    assert_eq!(event.added, vec![b3, b4, b5]);
    assert!(event.removed.is_empty());
    assert_eq!(
        event.added_logs.iter().map(|l| l.data.0[0]).collect::<Vec<_>>(),
        vec![0x2, 0x3]
    );
}

#[tokio::test]
async fn scenario_5_rollback_plus_backfill() {
    let provider = ScriptedProvider::new();
    let store = InMemoryStore::new();

    let b1 = header(1, 1, 0);
    let b2 = header(2, 2, 1);
    let b3 = header(3, 3, 2);
    let b4 = header(4, 4, 3);
    let mut window = BlockWindow::new(64);
    for b in [b1, b2, b3, b4] {
        window.append(b).unwrap();
    }
    store
        .append_logs(&[log(&b2, 0x3), log(&b3, 0x2), log(&b4, 0x1)])
        .await
        .unwrap();

    provider.set_block(b1, vec![]);
    provider.set_block(b2, vec![]);
    let b3p = header(3, 30, 2);
    let b4p = header(4, 40, 30);
    let b5p = header(5, 50, 40);
    provider.set_block(b3p, vec![log(&b3p, 0x5)]);
    provider.set_block(b4p, vec![]);
    provider.set_block(b5p, vec![]);

    let event = reconcile(&provider, &store, &window, b5p).await.unwrap();
    assert_eq!(event.added, vec![b3p, b4p, b5p]);
    assert_eq!(event.removed, vec![b4, b3]);
    assert_eq!(
        event.added_logs.iter().map(|l| l.data.0[0]).collect::<Vec<_>>(),
        vec![0x5]
    );
    assert_eq!(
        event.removed_logs.iter().map(|l| l.data.0[0]).collect::<Vec<_>>(),
        vec![0x1, 0x2]
    );
}

#[tokio::test]
async fn scenario_6_preflight_rejects_rewritten_finalized() {
    use chain_tracker::{config::TrackerConfig, dispatcher::Dispatcher, syncer::{CancellationToken, Syncer}};
    use std::sync::Arc;

    let provider = Arc::new(ScriptedProvider::new());
    let store = Arc::new(InMemoryStore::new());

    store
        .save_window(&(0..=10).map(|n| header(n, n, n.wrapping_sub(1))).collect::<Vec<_>>())
        .await
        .unwrap();

    for n in 0..=10u64 {
        provider.set_block(header(n, n, n.wrapping_sub(1)), vec![]);
    }
    let new_ten = header(10, 999, 888);
    provider.set_block(new_ten, vec![]);
    provider.set_head(1000);

    let config = TrackerConfig {
        max_backlog: 64,
        batch_size: 100,
        poll_interval: std::time::Duration::from_secs(1),
        start_block: None,
        provider_timeout: std::time::Duration::from_secs(1),
        retry_backoff_ceiling: std::time::Duration::from_secs(1),
        queue_capacity: 10,
        event_channel_capacity: 10,
    };

    let dispatcher = Dispatcher::new(
        provider.clone(),
        store.clone(),
        FilterSpec::match_all(),
        config.max_backlog,
        config.provider_timeout,
        config.queue_capacity,
        config.event_channel_capacity,
    )
    .await
    .unwrap();
    let handle = dispatcher.handle();
    tokio::spawn(dispatcher.run());

    let syncer = Syncer::new(provider, handle, FilterSpec::match_all(), config);
    let cancel = CancellationToken::new();
    let err = syncer.sync(&cancel).await.unwrap_err();
    assert!(matches!(err, TrackerError::ProviderRewroteFinalized));
}
