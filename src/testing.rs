//! In-memory `Store` and a scripted `ChainProvider`, used by this crate's
//! own test suite to exercise the reconciliation scenarios end to end
//! without a live chain connection.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use web3::types::{Address, H256};

use crate::{
    error::{BlockId, ProviderError, StoreError},
    model::{BlockHeader, BlockNumber, Log},
    provider::{ChainProvider, LogQuery},
    store::Store,
};

/// A `Store` backed by plain `Vec`s behind a mutex. Good enough for tests;
/// makes no durability claims.
#[derive(Default)]
pub struct InMemoryStore {
    window: Mutex<Option<Vec<BlockHeader>>>,
    logs: Mutex<Vec<Log>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs_snapshot(&self) -> Vec<Log> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_window(&self) -> Result<Option<Vec<BlockHeader>>, StoreError> {
        Ok(self.window.lock().unwrap().clone())
    }

    async fn save_window(&self, window: &[BlockHeader]) -> Result<(), StoreError> {
        *self.window.lock().unwrap() = Some(window.to_vec());
        Ok(())
    }

    async fn append_logs(&self, logs: &[Log]) -> Result<(), StoreError> {
        self.logs.lock().unwrap().extend_from_slice(logs);
        Ok(())
    }

    async fn remove_logs_by_block_hashes(&self, block_hashes: &[H256]) -> Result<(), StoreError> {
        self.logs
            .lock()
            .unwrap()
            .retain(|l| !block_hashes.contains(&l.block_hash));
        Ok(())
    }

    async fn logs_by_block_hashes(&self, block_hashes: &[H256]) -> Result<Vec<Log>, StoreError> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| block_hashes.contains(&l.block_hash))
            .cloned()
            .collect())
    }

    async fn range_logs(
        &self,
        from_num: BlockNumber,
        to_num: BlockNumber,
    ) -> Result<Vec<Log>, StoreError> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.block_number >= from_num && l.block_number <= to_num)
            .cloned()
            .collect())
    }
}

/// A provider whose entire canonical view is set up (and mutated, to
/// script a reorg mid-test) directly by the test, rather than fetched over
/// the network.
#[derive(Default)]
pub struct ScriptedProvider {
    state: Mutex<ProviderState>,
}

#[derive(Default)]
struct ProviderState {
    by_number: HashMap<BlockNumber, BlockHeader>,
    by_hash: HashMap<H256, BlockHeader>,
    logs_by_hash: HashMap<H256, Vec<Log>>,
    head: BlockNumber,
    range_too_large_above: Option<u64>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or overwrites, to simulate a reorg) the canonical header at
    /// `header.number`, along with the logs it emits, and advances `head`
    /// if `header.number` is now the highest known.
    pub fn set_block(&self, header: BlockHeader, logs: Vec<Log>) {
        let mut state = self.state.lock().unwrap();
        state.by_number.insert(header.number, header);
        state.by_hash.insert(header.hash, header);
        state.logs_by_hash.insert(header.hash, logs);
        if header.number > state.head {
            state.head = header.number;
        }
    }

    pub fn set_head(&self, head: BlockNumber) {
        self.state.lock().unwrap().head = head;
    }

    /// Any `Range` query spanning more than `max_span` blocks fails with
    /// `RangeTooLarge`, to exercise the `Syncer`'s batch-halving path.
    pub fn set_range_limit(&self, max_span: u64) {
        self.state.lock().unwrap().range_too_large_above = Some(max_span);
    }
}

#[async_trait]
impl ChainProvider for ScriptedProvider {
    async fn head_number(&self) -> Result<BlockNumber, ProviderError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_by_number(&self, number: BlockNumber) -> Result<BlockHeader, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .by_number
            .get(&number)
            .copied()
            .ok_or(ProviderError::NotFound(BlockId::Number(number)))
    }

    async fn block_by_hash(&self, hash: H256) -> Result<BlockHeader, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .by_hash
            .get(&hash)
            .copied()
            .ok_or(ProviderError::NotFound(BlockId::Hash(hash)))
    }

    async fn logs(&self, query: LogQuery) -> Result<Vec<Log>, ProviderError> {
        let state = self.state.lock().unwrap();
        match query {
            LogQuery::BlockHash { block_hash } => {
                Ok(state.logs_by_hash.get(&block_hash).cloned().unwrap_or_default())
            }
            LogQuery::Range {
                from,
                to,
                addresses,
                topics,
            } => {
                if let Some(limit) = state.range_too_large_above {
                    if to - from + 1 > limit {
                        return Err(ProviderError::RangeTooLarge);
                    }
                }
                let mut out = Vec::new();
                for number in from..=to {
                    if let Some(header) = state.by_number.get(&number) {
                        for log in state.logs_by_hash.get(&header.hash).cloned().unwrap_or_default() {
                            if matches_address_topics(&log, &addresses, &topics) {
                                out.push(log);
                            }
                        }
                    }
                }
                Ok(out)
            }
        }
    }
}

fn matches_address_topics(log: &Log, addresses: &[Address], topics: &[Option<Vec<H256>>]) -> bool {
    if !addresses.is_empty() && !addresses.contains(&log.address) {
        return false;
    }
    for (slot, constraint) in topics.iter().enumerate() {
        let Some(allowed) = constraint else { continue };
        match log.topics.get(slot) {
            Some(topic) if allowed.contains(topic) => {}
            _ => return false,
        }
    }
    true
}
