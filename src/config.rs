// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::metrics::BatcherMetrics;
use crate::sender::Sender;
use crate::supervisor::Supervisor;

/// Default bound on the ingest `mpsc` channel between submitters and the
/// core loop. Ordinary Tokio channels are bounded by default, unlike the
/// original's unbounded Go channel; this is an ambient sizing knob the
/// distilled spec does not name.
pub const DEFAULT_INGEST_CHANNEL_CAPACITY: usize = 1024;

/// Construction parameters for a [`crate::Batcher`].
///
/// Built via [`ConfigBuilder`]; `sender` and `supervisor` are the only
/// required fields, everything else defaults to "disabled" or a documented
/// constant.
pub struct Config<S: Sender> {
    pub(crate) sender: Arc<S>,
    pub(crate) supervisor: Arc<dyn Supervisor>,
    pub(crate) max_msgs_per_batch: Option<usize>,
    pub(crate) max_wait: Option<Duration>,
    pub(crate) max_idle: Option<Duration>,
    pub(crate) in_flight_backpressure: Option<usize>,
    pub(crate) ingest_channel_capacity: usize,
    pub(crate) metrics: Option<Arc<BatcherMetrics>>,
}

/// Builder for [`Config`]. `sender` and `supervisor` must be set; calling
/// [`ConfigBuilder::build`] without them panics, matching other
/// construction-time misuse checks in this codebase (e.g. missing
/// committee/config at authority startup).
pub struct ConfigBuilder<S: Sender> {
    sender: Option<Arc<S>>,
    supervisor: Option<Arc<dyn Supervisor>>,
    max_msgs_per_batch: Option<usize>,
    max_wait: Option<Duration>,
    max_idle: Option<Duration>,
    in_flight_backpressure: Option<usize>,
    ingest_channel_capacity: usize,
    metrics: Option<Arc<BatcherMetrics>>,
}

impl<S: Sender> Default for ConfigBuilder<S> {
    fn default() -> Self {
        Self {
            sender: None,
            supervisor: None,
            max_msgs_per_batch: None,
            max_wait: None,
            max_idle: None,
            in_flight_backpressure: None,
            ingest_channel_capacity: DEFAULT_INGEST_CHANNEL_CAPACITY,
            metrics: None,
        }
    }
}

impl<S: Sender> ConfigBuilder<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: Arc<S>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Flush when the queued count for a destination reaches `n`. `n == 0`
    /// is treated the same as never calling this (no size trigger).
    pub fn max_msgs_per_batch(mut self, n: usize) -> Self {
        self.max_msgs_per_batch = if n == 0 { None } else { Some(n) };
        self
    }

    pub fn max_wait(mut self, d: Duration) -> Self {
        self.max_wait = if d.is_zero() { None } else { Some(d) };
        self
    }

    pub fn max_idle(mut self, d: Duration) -> Self {
        self.max_idle = if d.is_zero() { None } else { Some(d) };
        self
    }

    /// Upper bound on concurrently dispatched batches. Unset means
    /// unbounded.
    pub fn in_flight_backpressure(mut self, n: usize) -> Self {
        self.in_flight_backpressure = if n == 0 { None } else { Some(n) };
        self
    }

    pub fn ingest_channel_capacity(mut self, n: usize) -> Self {
        self.ingest_channel_capacity = n;
        self
    }

    pub fn metrics(mut self, metrics: Arc<BatcherMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates required fields and assembles a [`Config`].
    ///
    /// # Panics
    ///
    /// Panics if `sender` or `supervisor` was never set: this is a
    /// construction-time misuse, not a runtime error, and must be surfaced
    /// loudly rather than deferred to the first `send`.
    pub fn build(self) -> Config<S> {
        let sender = self
            .sender
            .expect("Batcher misconfigured: no Sender was provided");
        let supervisor = self
            .supervisor
            .expect("Batcher misconfigured: no Supervisor was provided");

        if self.max_msgs_per_batch.is_none() && self.max_wait.is_none() && self.max_idle.is_none()
        {
            warn!(
                "Batcher configured with no size or time trigger enabled; \
                 pending batches will never flush"
            );
        }

        Config {
            sender,
            supervisor,
            max_msgs_per_batch: self.max_msgs_per_batch,
            max_wait: self.max_wait,
            max_idle: self.max_idle,
            in_flight_backpressure: self.in_flight_backpressure,
            ingest_channel_capacity: self.ingest_channel_capacity,
            metrics: self.metrics,
        }
    }
}
