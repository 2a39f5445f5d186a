//! The `Store` capability: persisted window + append-only log stream.
//!
//! Deliberately silent on the concrete storage engine: this module defines
//! the trait only; `testing.rs` ships an in-memory implementation for the
//! scenario suite.

use async_trait::async_trait;
use web3::types::H256;

use crate::{
    error::StoreError,
    model::{BlockHeader, BlockNumber, Log},
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Read the persisted window, or `None` if the store has never been
    /// written to (cold start).
    async fn load_window(&self) -> Result<Option<Vec<BlockHeader>>, StoreError>;

    /// Atomically replace the persisted window.
    async fn save_window(&self, window: &[BlockHeader]) -> Result<(), StoreError>;

    /// Ordered append; durable on return.
    async fn append_logs(&self, logs: &[Log]) -> Result<(), StoreError>;

    /// Remove every log whose `block_hash` is in `block_hashes`.
    async fn remove_logs_by_block_hashes(&self, block_hashes: &[H256]) -> Result<(), StoreError>;

    /// Read back the logs belonging to a set of block hashes. Used by the
    /// `Reconciler` to populate
    /// `Event::removed_logs` before the `Dispatcher` deletes them -- the
    /// provider is never consulted for blocks that have left its view of
    /// the chain.
    async fn logs_by_block_hashes(&self, block_hashes: &[H256]) -> Result<Vec<Log>, StoreError>;

    /// Read-back for consumers: logs with `from_num <= block_number <= to_num`.
    async fn range_logs(
        &self,
        from_num: BlockNumber,
        to_num: BlockNumber,
    ) -> Result<Vec<Log>, StoreError>;
}
