//! The tracker error taxonomy plus the host-facing `anyhow` alias.

use thiserror::Error;
use web3::types::H256;

use crate::model::BlockNumber;

/// Errors a [`ChainProvider`](crate::provider::ChainProvider) implementation
/// can return.
#[derive(Clone, Debug, Error)]
pub enum ProviderError {
    #[error("block {0:?} not found")]
    NotFound(BlockId),
    #[error("requested log range is too large")]
    RangeTooLarge,
    #[error("provider call timed out")]
    Timeout,
    #[error("provider transport error: {0}")]
    Transport(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockId {
    Number(BlockNumber),
    Hash(H256),
}

/// Errors a [`Store`](crate::store::Store) implementation can return.
#[derive(Clone, Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The tracker-level error taxonomy. `Reconciler`/`Syncer`/`Dispatcher`
/// all report failures through this type.
#[derive(Clone, Debug, Error)]
pub enum TrackerError {
    /// Transient; retried with backoff by the caller.
    #[error("provider returned an inconsistent view of the chain")]
    ProviderInconsistent,

    /// Fatal: the provider silently rewrote a block older than the backlog
    /// window. Tracker halts; operator intervention required.
    #[error("provider rewrote a block considered finalized")]
    ProviderRewroteFinalized,

    /// Fatal: a fork's common ancestor lies outside the retained window.
    #[error("reorg ancestor lies below the retained backlog")]
    AncestorBelowBacklog,

    /// Retried; Dispatcher pauses emission while retrying.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Clean shutdown requested mid-operation; no state corruption.
    #[error("operation cancelled")]
    Cancelled,

    /// Construction-time only: an invalid `FilterSpec` was supplied.
    #[error("invalid filter: {0}")]
    FilterCompileError(#[from] crate::filter::FilterCompileError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl TrackerError {
    /// Only these two variants halt the tracker permanently.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProviderRewroteFinalized | Self::AncestorBelowBacklog
        )
    }
}

/// Host-facing alias, matching the workspace's `anyhow::Result` convention
/// for the outermost layer (e.g. what an embedding `main()` would use).
pub type AnyResult<T> = anyhow::Result<T>;
