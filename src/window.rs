//! Bounded ring of the most recent canonical block headers.

use std::collections::VecDeque;

use thiserror::Error;

use crate::model::{BlockHeader, BlockNumber};
use web3::types::H256;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum WindowError {
    #[error("block does not extend the current cursor")]
    NotContiguous,
    #[error("window is empty")]
    Empty,
}

/// `W = [h_0, .., h_{k-1}]` with `k <= max_backlog`, adjacency-checked on
/// every [`append`](Self::append). `h_{k-1}` is the cursor.
#[derive(Clone, Debug)]
pub struct BlockWindow {
    entries:     VecDeque<BlockHeader>,
    max_backlog: usize,
}

impl BlockWindow {
    pub fn new(max_backlog: usize) -> Self {
        assert!(max_backlog > 0, "max_backlog must be positive");
        Self {
            entries: VecDeque::with_capacity(max_backlog),
            max_backlog,
        }
    }

    /// Rehydrate a window from a persisted snapshot without re-checking
    /// adjacency (the store is trusted to have persisted a valid window).
    pub fn from_snapshot(entries: Vec<BlockHeader>, max_backlog: usize) -> Self {
        Self {
            entries: entries.into(),
            max_backlog,
        }
    }

    pub fn max_backlog(&self) -> usize {
        self.max_backlog
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> Option<BlockHeader> {
        self.entries.back().copied()
    }

    pub fn oldest(&self) -> Option<BlockHeader> {
        self.entries.front().copied()
    }

    /// Append `h`, evicting from the front (FIFO) if `max_backlog` is
    /// exceeded. The first append into an empty window bypasses the
    /// parent-link check since there is no predecessor yet.
    pub fn append(&mut self, h: BlockHeader) -> Result<(), WindowError> {
        if let Some(cursor) = self.cursor() {
            if !h.follows(&cursor) {
                return Err(WindowError::NotContiguous);
            }
        }
        self.entries.push_back(h);
        while self.entries.len() > self.max_backlog {
            self.entries.pop_front();
        }
        Ok(())
    }

    /// Remove and return the cursor. Fails on an empty window.
    pub fn pop_back(&mut self) -> Result<BlockHeader, WindowError> {
        self.entries.pop_back().ok_or(WindowError::Empty)
    }

    pub fn find_by_hash(&self, hash: H256) -> Option<usize> {
        self.entries.iter().position(|h| h.hash == hash)
    }

    pub fn find_by_number(&self, number: BlockNumber) -> Option<&BlockHeader> {
        self.entries.iter().find(|h| h.number == number)
    }

    pub fn contains_number(&self, number: BlockNumber) -> bool {
        self.find_by_number(number).is_some()
    }

    pub fn get_by_hash(&self, hash: H256) -> Option<&BlockHeader> {
        self.entries.iter().find(|h| h.hash == hash)
    }

    /// An immutable copy suitable for handing to the store.
    pub fn snapshot(&self) -> Vec<BlockHeader> {
        self.entries.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockHeader> {
        self.entries.iter()
    }

    /// Checks the window's invariants; used by tests and debug assertions,
    /// not on the hot path.
    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) -> bool {
        if self.entries.len() > self.max_backlog {
            return false;
        }
        let mut prev: Option<&BlockHeader> = None;
        for entry in &self.entries {
            if let Some(prev) = prev {
                if !entry.follows(prev) {
                    return false;
                }
            }
            prev = Some(entry);
        }
        true
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
    fn append_builds_a_contiguous_chain() {
        let mut w = BlockWindow::new(10);
        w.append(header(1, 1, 0)).unwrap();
        w.append(header(2, 2, 1)).unwrap();
        w.append(header(3, 3, 2)).unwrap();
        assert_eq!(w.len(), 3);
        assert_eq!(w.cursor().unwrap().number, 3);
        assert!(w.check_invariants());
    }

    #[test]
    fn append_rejects_non_contiguous_block() {
        let mut w = BlockWindow::new(10);
        w.append(header(1, 1, 0)).unwrap();
        let err = w.append(header(3, 3, 1)).unwrap_err();
        assert_eq!(err, WindowError::NotContiguous);
    }

    #[test]
    fn append_evicts_fifo_past_max_backlog() {
        let mut w = BlockWindow::new(2);
        w.append(header(1, 1, 0)).unwrap();
        w.append(header(2, 2, 1)).unwrap();
        w.append(header(3, 3, 2)).unwrap();
        assert_eq!(w.len(), 2);
        assert_eq!(w.oldest().unwrap().number, 2);
        assert_eq!(w.cursor().unwrap().number, 3);
    }

    #[test]
    fn pop_back_removes_cursor() {
        let mut w = BlockWindow::new(10);
        w.append(header(1, 1, 0)).unwrap();
        w.append(header(2, 2, 1)).unwrap();
        let popped = w.pop_back().unwrap();
        assert_eq!(popped.number, 2);
        assert_eq!(w.cursor().unwrap().number, 1);
    }

    #[test]
    fn pop_back_on_empty_window_fails() {
        let mut w = BlockWindow::new(10);
        assert_eq!(w.pop_back().unwrap_err(), WindowError::Empty);
    }

    #[test]
    fn find_by_hash_returns_index() {
        let mut w = BlockWindow::new(10);
        w.append(header(1, 1, 0)).unwrap();
        w.append(header(2, 2, 1)).unwrap();
        assert_eq!(w.find_by_hash(h(2)), Some(1));
        assert_eq!(w.find_by_hash(h(99)), None);
    }
}
