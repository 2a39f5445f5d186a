//! Chain primitives: block headers, logs, and the committed `Event` diff.
//!
//! Hashes and addresses reuse `web3::types` the way the rest of this
//! workspace does, even in code paths (like this one) that never open a
//! network connection themselves.

use serde::{Deserialize, Serialize};
use web3::types::{Address, Bytes, H256};

/// A block number. Zero is genesis and has no parent.
pub type BlockNumber = u64;

/// A block header: just enough to validate chain linkage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash:        H256,
    pub number:      BlockNumber,
    pub parent_hash: H256,
}

impl BlockHeader {
    /// The well-known parent hash of the genesis block.
    pub fn genesis_parent() -> H256 {
        H256::zero()
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }

    /// True iff `self` could directly follow `parent` in the window.
    pub fn follows(&self, parent: &Self) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

/// A single log emitted by a block, inheriting that block's hash.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Log {
    pub block_hash:     H256,
    pub block_number:   BlockNumber,
    pub address:        Address,
    /// Zero to four indexed topics, in on-chain order.
    pub topics:         Vec<H256>,
    pub data:           Bytes,
    pub index_in_block: u64,
}

/// A committed diff: what left the window and what entered it.
///
/// `removed` is newest-first (LIFO rollback order); `added` is
/// oldest-first (parent-before-child). An `Event` with both lists empty
/// represents "no change" and is never published by the [`Dispatcher`](crate::dispatcher::Dispatcher).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Event {
    pub added:       Vec<BlockHeader>,
    pub removed:      Vec<BlockHeader>,
    pub added_logs:   Vec<Log>,
    pub removed_logs: Vec<Log>,
}

impl Event {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// The block the event leaves the window resting on, if it changes the
    /// cursor at all. `None` for an empty event (caller should keep the
    /// existing cursor).
    pub fn new_cursor(&self) -> Option<BlockHeader> {
        self.added.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn follows_checks_both_number_and_hash() {
        let parent = header(1, 1, 0);
        let child = header(2, 2, 1);
        assert!(child.follows(&parent));

        let wrong_number = header(3, 3, 1);
        assert!(!wrong_number.follows(&parent));

        let wrong_parent = header(2, 4, 99);
        assert!(!wrong_parent.follows(&parent));
    }

    #[test]
    fn empty_event_has_no_new_cursor() {
        let event = Event::default();
        assert!(event.is_empty());
        assert_eq!(event.new_cursor(), None);
    }
}
