// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::batch::{PendingBatch, Submission};
use crate::context::RequestContext;
use crate::error::BatcherError;
use crate::heap::DeadlineHeap;
use crate::metrics::BatcherMetrics;
use crate::sender::Sender;
use crate::supervisor::Supervisor;

pub(crate) type IngestItem<D, Req, Resp, E> = (D, Submission<Req, Resp, E>);

fn far_future() -> Instant {
    // Tokio's `Instant` has no dedicated "never" sentinel; ten years out is
    // far enough that the master timer never legitimately fires while the
    // heap is empty, and short enough to stay well inside `Instant`'s range.
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 10)
}

/// Single owner of all mutable batcher state: the pending-batch map, the
/// deadline heap, and the master timer. Everything else reaches it only
/// through channels (4.2).
pub(crate) struct CoreLoop<D, S: Sender> {
    sender: Arc<S>,
    supervisor: Arc<dyn Supervisor>,
    metrics: Option<Arc<BatcherMetrics>>,

    max_msgs_per_batch: Option<usize>,
    max_wait: Option<Duration>,
    max_idle: Option<Duration>,
    backpressure: Option<Arc<Semaphore>>,

    pending: HashMap<D, PendingBatch<S::Request, S::Response, S::Error>>,
    heap: DeadlineHeap<D>,
    sleep: Pin<Box<Sleep>>,
    /// Source of `PendingBatch::generation` values. Never reset: a
    /// destination gets a brand new `PendingBatch` every time its previous
    /// one is dispatched, so generation numbers must keep climbing across
    /// that destination's whole lifetime, not just within one batch, or a
    /// stale heap entry left by an earlier batch could alias a live one
    /// (see the field doc on `PendingBatch::generation`).
    next_generation: u64,

    ingest_rx: mpsc::Receiver<IngestItem<D, S::Request, S::Response, S::Error>>,
    completion_tx: mpsc::UnboundedSender<()>,
    completion_rx: mpsc::UnboundedReceiver<()>,
    in_flight: usize,

    /// Cancellation scope dispatch workers derive their Sender context from.
    /// Deliberately independent of any submitter's context and of the
    /// supervisor's shutdown signal: see 4.3/4.5 and Design Notes
    /// "Cancellation isolation".
    dispatch_scope: CancellationToken,
}

impl<D, S> CoreLoop<D, S>
where
    D: Eq + Hash + Clone + Send + 'static,
    S: Sender,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sender: Arc<S>,
        supervisor: Arc<dyn Supervisor>,
        metrics: Option<Arc<BatcherMetrics>>,
        max_msgs_per_batch: Option<usize>,
        max_wait: Option<Duration>,
        max_idle: Option<Duration>,
        in_flight_backpressure: Option<usize>,
        ingest_rx: mpsc::Receiver<IngestItem<D, S::Request, S::Response, S::Error>>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            sender,
            supervisor,
            metrics,
            max_msgs_per_batch,
            max_wait,
            max_idle,
            backpressure: in_flight_backpressure.map(|n| Arc::new(Semaphore::new(n))),
            pending: HashMap::new(),
            heap: DeadlineHeap::new(),
            sleep: Box::pin(tokio::time::sleep_until(far_future())),
            next_generation: 0,
            ingest_rx,
            completion_tx,
            completion_rx,
            in_flight: 0,
            dispatch_scope: CancellationToken::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!("batcher core loop starting");
        loop {
            tokio::select! {
                biased;

                () = self.supervisor.should_quiesce() => {
                    debug!("batcher received shutdown signal; draining");
                    break;
                }

                maybe_submission = self.ingest_rx.recv() => {
                    match maybe_submission {
                        Some((destination, submission)) => {
                            self.handle_ingest(destination, submission).await;
                        }
                        None => {
                            // No `Batcher` handle can exist without holding a
                            // sender clone; this only happens once every
                            // handle has been dropped without an explicit
                            // shutdown. Equivalent to shutdown for our
                            // purposes.
                            debug!("all ingest senders dropped; draining");
                            break;
                        }
                    }
                }

                () = self.sleep.as_mut() => {
                    self.handle_tick().await;
                }

                maybe_completion = self.completion_rx.recv() => {
                    if maybe_completion.is_some() {
                        self.on_dispatch_complete();
                    }
                }
            }
        }
        self.drain().await;
        info!("batcher core loop exited");
    }

    async fn handle_ingest(
        &mut self,
        destination: D,
        submission: Submission<S::Request, S::Response, S::Error>,
    ) {
        let now = Instant::now();
        let batch = self
            .pending
            .entry(destination.clone())
            .or_insert_with(|| PendingBatch::new(now));
        batch.push(submission, now);
        if let Some(metrics) = &self.metrics {
            metrics.queued_submissions.inc();
        }

        let size_trigger = self
            .max_msgs_per_batch
            .is_some_and(|max| batch.len() >= max);

        if size_trigger {
            let batch = self
                .pending
                .remove(&destination)
                .expect("just inserted above");
            trace!(size = batch.len(), "size trigger fired, dispatching");
            self.dispatch(batch).await;
            return;
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let deadline = batch.recompute_deadline(self.max_wait, self.max_idle, generation);
        if let Some(deadline) = deadline {
            self.heap.push(destination, deadline, generation);
            self.rearm_timer();
        }
    }

    async fn handle_tick(&mut self) {
        let now = Instant::now();
        while let Some(top_deadline) = self.heap.peek_deadline() {
            if top_deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peek just confirmed an entry");
            let is_live = matches!(
                self.pending.get(&entry.destination),
                Some(batch) if batch.generation == entry.generation
            );
            if !is_live {
                // Stale: either already dispatched by a size trigger, or a
                // later submission recomputed the deadline and pushed a
                // fresher entry (lazy deletion, see `heap`).
                continue;
            }
            let batch = self
                .pending
                .remove(&entry.destination)
                .expect("is_live just confirmed presence");
            trace!(size = batch.len(), "time trigger fired, dispatching");
            self.dispatch(batch).await;
        }
        self.rearm_timer();
    }

    fn rearm_timer(&mut self) {
        let deadline = self.heap.peek_deadline().unwrap_or_else(far_future);
        self.sleep.as_mut().reset(deadline);
    }

    /// Removes a pending batch from local state and hands it to a dispatch
    /// worker. May suspend at the backpressure permit acquire: the only
    /// place besides the top-level `select!` that the core loop blocks.
    async fn dispatch(&mut self, batch: PendingBatch<S::Request, S::Response, S::Error>) {
        let batch_len = batch.len();
        let (requests, replies) = batch.into_parts();

        if let Some(metrics) = &self.metrics {
            metrics.queued_submissions.sub(batch_len as i64);
        }

        let permit = if let Some(semaphore) = &self.backpressure {
            Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("backpressure semaphore is never closed"),
            )
        } else {
            None
        };

        if let Some(metrics) = &self.metrics {
            metrics.in_flight_batches.inc();
        }
        self.in_flight += 1;

        let ctx = RequestContext::with_cancellation(self.dispatch_scope.clone());
        let fut = crate::dispatch::run(
            self.sender.clone(),
            ctx,
            requests,
            replies,
            permit,
            self.completion_tx.clone(),
            self.metrics.clone(),
        );
        self.supervisor
            .spawn_supervised("batcher-dispatch", Box::pin(fut));
    }

    fn on_dispatch_complete(&mut self) {
        self.in_flight -= 1;
        if let Some(metrics) = &self.metrics {
            metrics.in_flight_batches.dec();
        }
    }

    /// Shutdown drain (4.5): reject every queued submission with
    /// `Unavailable`, leave in-flight dispatches to finish normally, and
    /// exit once the in-flight count reaches zero.
    async fn drain(&mut self) {
        self.ingest_rx.close();

        let mut rejected = 0usize;
        for (_, batch) in self.pending.drain() {
            let batch_len = batch.len();
            let (_, replies) = batch.into_parts();
            for reply in replies {
                let _ = reply.send(Err(BatcherError::Unavailable));
            }
            rejected += batch_len;
        }
        if let Some(metrics) = &self.metrics {
            metrics.queued_submissions.sub(rejected as i64);
        }
        debug!(rejected, in_flight = self.in_flight, "drain started");

        // A submission may have landed in the channel's internal buffer
        // between the shutdown signal firing and `close()` above; drain it
        // too rather than leaving its reply channel to hang forever.
        while let Ok((_, submission)) = self.ingest_rx.try_recv() {
            let _ = submission.reply.send(Err(BatcherError::Unavailable));
        }

        while self.in_flight > 0 {
            match self.completion_rx.recv().await {
                Some(()) => self.on_dispatch_complete(),
                None => break,
            }
        }
        debug!("drain complete");
    }
}
