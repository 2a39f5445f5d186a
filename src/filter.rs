//! Address + per-topic-slot matcher, applied at log ingestion.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web3::types::{Address, H256};

/// Maximum number of indexed topic slots a log can have.
pub const MAX_TOPICS: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum FilterCompileError {
    #[error("filter has more than {MAX_TOPICS} topic slots")]
    TooManyTopicSlots,
}

/// `{ addresses, topics }`: a log matches iff its address is in
/// `addresses` (empty means "any") and, for each topic slot, either the
/// filter has no constraint there or the log's topic is in the set.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    addresses: HashSet<Address>,
    topics:    [Option<HashSet<H256>>; MAX_TOPICS],
}

impl FilterSpec {
    /// Matches every log unconditionally.
    pub fn match_all() -> Self {
        Self::default()
    }

    pub fn addresses(&self) -> &HashSet<Address> {
        &self.addresses
    }

    pub fn topics(&self) -> &[Option<HashSet<H256>>; MAX_TOPICS] {
        &self.topics
    }

    /// Builds a filter from an address set and up to four topic-slot sets.
    /// `topics.len() > MAX_TOPICS` is a construction-time error.
    pub fn new(
        addresses: HashSet<Address>,
        topics: Vec<Option<HashSet<H256>>>,
    ) -> Result<Self, FilterCompileError> {
        if topics.len() > MAX_TOPICS {
            return Err(FilterCompileError::TooManyTopicSlots);
        }
        let mut slots: [Option<HashSet<H256>>; MAX_TOPICS] = [None, None, None, None];
        for (slot, value) in slots.iter_mut().zip(topics.into_iter()) {
            *slot = value;
        }
        Ok(Self {
            addresses,
            topics: slots,
        })
    }

    pub fn matches(&self, log: &crate::model::Log) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        for (slot, constraint) in self.topics.iter().enumerate() {
            let Some(allowed) = constraint else {
                continue;
            };
            match log.topics.get(slot) {
                Some(topic) if allowed.contains(topic) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::model::Log;
    use web3::types::Bytes;

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    fn topic(n: u8) -> H256 {
        H256::from_low_u64_be(n as u64)
    }

    fn log(address: Address, topics: Vec<H256>) -> Log {
        Log {
            block_hash: H256::zero(),
            block_number: 1,
            address,
            topics,
            data: Bytes(vec![]),
            index_in_block: 0,
        }
    }

    #[test]
    fn match_all_accepts_everything() {
        let filter = FilterSpec::match_all();
        assert!(filter.matches(&log(addr(1), vec![topic(1)])));
    }

    #[test]
    fn address_filter_rejects_other_addresses() {
        let mut addresses = HashSet::new();
        addresses.insert(addr(1));
        let filter = FilterSpec::new(addresses, vec![]).unwrap();
        assert!(filter.matches(&log(addr(1), vec![])));
        assert!(!filter.matches(&log(addr(2), vec![])));
    }

    #[test]
    fn topic_filter_checks_each_slot_independently() {
        let mut slot0 = HashSet::new();
        slot0.insert(topic(10));
        let filter = FilterSpec::new(HashSet::new(), vec![Some(slot0), None]).unwrap();
        assert!(filter.matches(&log(addr(1), vec![topic(10), topic(99)])));
        assert!(!filter.matches(&log(addr(1), vec![topic(11), topic(99)])));
        // Missing topic slot that the filter constrains: no match.
        assert!(!filter.matches(&log(addr(1), vec![])));
    }

    #[test]
    fn too_many_topic_slots_is_a_compile_error() {
        let topics = vec![None, None, None, None, None];
        assert_eq!(
            FilterSpec::new(HashSet::new(), topics).unwrap_err(),
            FilterCompileError::TooManyTopicSlots
        );
    }

    proptest! {
        /// An unconstrained address set or topic slot never rejects a log on
        /// that axis, regardless of what the log carries there.
        #[test]
        fn match_all_never_rejects(addr_byte in any::<u8>(), topic_bytes in proptest::collection::vec(any::<u8>(), 0..4)) {
            let filter = FilterSpec::match_all();
            let topics = topic_bytes.into_iter().map(topic).collect();
            prop_assert!(filter.matches(&log(addr(addr_byte), topics)));
        }

        /// Once an address is added to the filter's set, any log from that
        /// exact address still matches no matter what topics it carries.
        #[test]
        fn own_address_always_matches(addr_byte in any::<u8>(), topic_bytes in proptest::collection::vec(any::<u8>(), 0..4)) {
            let mut addresses = HashSet::new();
            addresses.insert(addr(addr_byte));
            let filter = FilterSpec::new(addresses, vec![]).unwrap();
            let topics = topic_bytes.into_iter().map(topic).collect();
            prop_assert!(filter.matches(&log(addr(addr_byte), topics)));
        }
    }
}
