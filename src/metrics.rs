// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_with_registry, register_int_gauge_with_registry, Histogram, IntGauge,
    Registry,
};

/// Prometheus metrics for a single [`crate::Batcher`] instance.
///
/// The distilled specification for this component names no metrics
/// surface, but every other long-running component in this codebase
/// registers one against a shared [`Registry`]; the batcher follows suit
/// rather than running dark.
pub struct BatcherMetrics {
    pub(crate) queued_submissions: IntGauge,
    pub(crate) in_flight_batches: IntGauge,
    pub(crate) dispatched_batch_size: Histogram,
    pub(crate) dispatch_latency_seconds: Histogram,
}

impl BatcherMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            queued_submissions: register_int_gauge_with_registry!(
                "batcher_queued_submissions",
                "Number of submissions currently queued across all pending batches",
                registry,
            )
            .unwrap(),
            in_flight_batches: register_int_gauge_with_registry!(
                "batcher_in_flight_batches",
                "Number of batches currently dispatched to the Sender and awaiting a response",
                registry,
            )
            .unwrap(),
            dispatched_batch_size: register_histogram_with_registry!(
                "batcher_dispatched_batch_size",
                "Number of sub-requests in a dispatched batch",
                vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0],
                registry,
            )
            .unwrap(),
            dispatch_latency_seconds: register_histogram_with_registry!(
                "batcher_dispatch_latency_seconds",
                "Time from handing a batch to the Sender to receiving its response",
                prometheus::exponential_buckets(0.001, 2.0, 16).unwrap(),
                registry,
            )
            .unwrap(),
        }
    }

    /// A metrics instance backed by a private, unregistered registry. Handy
    /// for tests and for callers that don't want to wire up Prometheus.
    pub fn new_for_tests() -> Self {
        Self::new(&Registry::new())
    }
}
