//! Prometheus metrics: a handful of `once_cell::sync::Lazy` statics
//! registered at first use.

use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, linear_buckets, register_histogram, register_int_counter, Histogram,
    IntCounter,
};

pub static CANDIDATES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "candidates_received",
        "Count of candidate heads submitted to the dispatcher."
    )
    .unwrap()
});

pub static BLOCKS_ADDED: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "blocks_added",
        "The number of blocks added in one committed event.",
        linear_buckets(1.0, 1.0, 20).unwrap()
    )
    .unwrap()
});

pub static BLOCKS_REMOVED: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "blocks_removed",
        "The depth of a reorg rollback, in blocks.",
        linear_buckets(1.0, 1.0, 10).unwrap()
    )
    .unwrap()
});

pub static RECONCILE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "reconcile_latency_seconds",
        "Time spent computing a reconcile plan."
    )
    .unwrap()
});

pub static PROVIDER_CALL_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "provider_call_latency_seconds",
        "Latency of individual ChainProvider calls.",
        exponential_buckets(0.01, 2.0, 12).unwrap()
    )
    .unwrap()
});

pub static SYNC_BATCH_SIZE: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "sync_batch_size",
        "The log-range batch size used by a bulk catch-up request.",
        exponential_buckets(1.0, 2.0, 16).unwrap()
    )
    .unwrap()
});

pub static RANGE_TOO_LARGE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sync_range_too_large",
        "Count of bulk catch-up requests rejected for being too large."
    )
    .unwrap()
});

pub static FATAL_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tracker_fatal_errors",
        "Count of fatal errors (ProviderRewroteFinalized, AncestorBelowBacklog)."
    )
    .unwrap()
});
