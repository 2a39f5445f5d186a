//! The `ChainProvider` capability: remote queries only, no mutation.
//!
//! Deliberately silent on the concrete HTTP/WebSocket JSON-RPC transport:
//! concrete backends implement this trait, and the core engine only ever
//! sees `&dyn ChainProvider` / `Arc<dyn ChainProvider>`.

use async_trait::async_trait;
use web3::types::{Address, H256};

use crate::{
    error::ProviderError,
    model::{BlockHeader, BlockNumber, Log},
};

/// Either `{ block_hash }` or `{ from, to, addresses, topics }`.
/// Range queries are for bulk catch-up only (see `syncer.rs`); steady-state
/// reconciliation always queries by block hash.
#[derive(Clone, Debug)]
pub enum LogQuery {
    BlockHash {
        block_hash: H256,
    },
    Range {
        from:      BlockNumber,
        to:        BlockNumber,
        addresses: Vec<Address>,
        topics:    Vec<Option<Vec<H256>>>,
    },
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Current best-known head number.
    async fn head_number(&self) -> Result<BlockNumber, ProviderError>;

    /// Canonical header at `number`. Errors with `NotFound`.
    async fn block_by_number(&self, number: BlockNumber) -> Result<BlockHeader, ProviderError>;

    /// Header by hash. Errors with `NotFound`.
    async fn block_by_hash(&self, hash: H256) -> Result<BlockHeader, ProviderError>;

    /// Logs matching `query`. May reject a `Range` query with
    /// `RangeTooLarge`, in which case the caller (the `Syncer`) halves its
    /// batch size and retries.
    async fn logs(&self, query: LogQuery) -> Result<Vec<Log>, ProviderError>;
}
