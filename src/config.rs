//! Tunables, wired up with `structopt` the way the workspace's
//! `ethereum::Options`/`database::Options` do: derive a struct, flatten it
//! into the binary's top-level `Options`, and let `env` give every flag a
//! matching environment variable.

use structopt::StructOpt;

use crate::model::BlockNumber;

#[derive(StructOpt, Clone, Debug)]
pub struct TrackerOptions {
    /// Number of most-recent blocks retained locally for reorg detection.
    #[structopt(long, env = "TRACKER_MAX_BACKLOG", default_value = "64")]
    pub max_backlog: usize,

    /// Initial (and steady-state ceiling) log-range batch size used by bulk
    /// catch-up, halved on `RangeTooLarge` and restored afterward.
    #[structopt(long, env = "TRACKER_BATCH_SIZE", default_value = "2000")]
    pub batch_size: usize,

    /// Interval between `head_number` polls, once caught up.
    #[structopt(long, env = "TRACKER_POLL_INTERVAL_MS", default_value = "4000")]
    pub poll_interval_ms: u64,

    /// Overrides the computed bootstrap start block on an empty store.
    #[structopt(long, env = "TRACKER_START_BLOCK")]
    pub start_block: Option<BlockNumber>,

    /// Per-call timeout against the `ChainProvider`.
    #[structopt(long, env = "TRACKER_PROVIDER_TIMEOUT_MS", default_value = "10000")]
    pub provider_timeout_ms: u64,

    /// Ceiling on the exponential retry backoff applied to a transient
    /// `TrackerError`.
    #[structopt(long, env = "TRACKER_RETRY_BACKOFF_CEILING_MS", default_value = "30000")]
    pub retry_backoff_ceiling_ms: u64,

    /// Bound on the dispatcher's candidate-head queue depth.
    #[structopt(long, env = "TRACKER_QUEUE_CAPACITY", default_value = "256")]
    pub queue_capacity: usize,

    /// Bound on the published-event broadcast channel.
    #[structopt(long, env = "TRACKER_EVENT_CHANNEL_CAPACITY", default_value = "1024")]
    pub event_channel_capacity: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self::from_iter(std::iter::empty::<String>())
    }
}

/// The runtime-resolved form of [`TrackerOptions`], after parsing durations
/// out of their millisecond fields.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub max_backlog: usize,
    pub batch_size: usize,
    pub poll_interval: std::time::Duration,
    pub start_block: Option<BlockNumber>,
    pub provider_timeout: std::time::Duration,
    pub retry_backoff_ceiling: std::time::Duration,
    pub queue_capacity: usize,
    pub event_channel_capacity: usize,
}

impl From<TrackerOptions> for TrackerConfig {
    fn from(o: TrackerOptions) -> Self {
        Self {
            max_backlog: o.max_backlog,
            batch_size: o.batch_size,
            poll_interval: std::time::Duration::from_millis(o.poll_interval_ms),
            start_block: o.start_block,
            provider_timeout: std::time::Duration::from_millis(o.provider_timeout_ms),
            retry_backoff_ceiling: std::time::Duration::from_millis(o.retry_backoff_ceiling_ms),
            queue_capacity: o.queue_capacity,
            event_channel_capacity: o.event_channel_capacity,
        }
    }
}

impl TrackerConfig {
    /// `StartBlock` if set, else `max(0, head - MaxBacklog + 1)`.
    pub fn bootstrap_start(&self, head: BlockNumber) -> BlockNumber {
        if let Some(start) = self.start_block {
            return start;
        }
        head.saturating_sub(self.max_backlog as u64 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_backlog: usize, start_block: Option<BlockNumber>) -> TrackerConfig {
        TrackerConfig {
            max_backlog,
            batch_size: 100,
            poll_interval: std::time::Duration::from_secs(1),
            start_block,
            provider_timeout: std::time::Duration::from_secs(1),
            retry_backoff_ceiling: std::time::Duration::from_secs(1),
            queue_capacity: 10,
            event_channel_capacity: 10,
        }
    }

    #[test]
    fn bootstrap_defaults_to_head_minus_backlog() {
        let c = config(64, None);
        assert_eq!(c.bootstrap_start(1000), 1000 - 63);
    }

    #[test]
    fn bootstrap_clamps_at_genesis() {
        let c = config(64, None);
        assert_eq!(c.bootstrap_start(10), 0);
    }

    #[test]
    fn start_block_override_wins() {
        let c = config(64, Some(500));
        assert_eq!(c.bootstrap_start(1000), 500);
    }
}
