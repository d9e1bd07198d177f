// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::batch::Submission;
use crate::config::Config;
use crate::context::{ContextOutcome, RequestContext};
use crate::core::CoreLoop;
use crate::error::BatcherError;
use crate::sender::Sender;
use crate::supervisor::Supervisor;

fn context_error<E>(outcome: ContextOutcome) -> BatcherError<E> {
    match outcome {
        ContextOutcome::Cancelled => BatcherError::Cancelled,
        ContextOutcome::DeadlineExceeded => BatcherError::DeadlineExceeded,
    }
}

/// Coalesces many independently submitted `(destination, request)` pairs
/// into fewer multi-request calls against a downstream [`Sender`].
///
/// `D` is the destination key: an opaque, comparable identifier for the
/// downstream shard/range/partition a request targets. Batching happens
/// independently per destination; see the crate-level docs for the overall
/// design.
///
/// Cloning a `Batcher` is cheap and shares the same core loop; this is the
/// expected way to hand it to multiple callers.
#[derive(Clone)]
pub struct Batcher<D, S: Sender> {
    ingest_tx: mpsc::Sender<(D, Submission<S::Request, S::Response, S::Error>)>,
    supervisor: Arc<dyn Supervisor>,
}

impl<D, S> Batcher<D, S>
where
    D: Eq + Hash + Clone + Send + 'static,
    S: Sender,
{
    /// Builds a batcher and spawns its core loop as supervised background
    /// work. Panics if `config` is missing a `Sender` or `Supervisor` — see
    /// [`crate::ConfigBuilder::build`].
    pub fn new(config: Config<S>) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_channel_capacity);

        let core = CoreLoop::new(
            config.sender,
            config.supervisor.clone(),
            config.metrics,
            config.max_msgs_per_batch,
            config.max_wait,
            config.max_idle,
            config.in_flight_backpressure,
            ingest_rx,
        );

        let supervisor = config.supervisor;
        supervisor.spawn_supervised("batcher-core-loop", Box::pin(core.run()));

        Self {
            ingest_tx,
            supervisor,
        }
    }

    /// Submits `request` for `destination` and waits for its reply.
    ///
    /// Returns the downstream response, the submitter's own context error,
    /// or [`BatcherError::Unavailable`] if the supervisor has signalled
    /// shutdown — see 4.1 of the design for the exact race semantics.
    pub async fn send(
        &self,
        ctx: &RequestContext,
        destination: D,
        request: S::Request,
    ) -> Result<S::Response, BatcherError<S::Error>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let submission = Submission {
            request,
            reply: reply_tx,
        };

        tokio::select! {
            biased;

            () = self.supervisor.should_quiesce() => {
                return Err(BatcherError::Unavailable);
            }

            outcome = ctx.cancelled() => {
                return Err(context_error(outcome));
            }

            result = self.ingest_tx.send((destination, submission)) => {
                if result.is_err() {
                    // The core loop has exited (drained and closed the
                    // ingest channel); equivalent to an unavailable batcher.
                    return Err(BatcherError::Unavailable);
                }
            }
        }

        tokio::select! {
            biased;

            () = self.supervisor.should_quiesce() => Err(BatcherError::Unavailable),

            outcome = ctx.cancelled() => Err(context_error(outcome)),

            reply = reply_rx => match reply {
                Ok(result) => result,
                // Core loop dropped the reply sender without responding;
                // only happens if it panicked, which we treat the same as
                // unavailable rather than panicking the caller too.
                Err(_) => Err(BatcherError::Unavailable),
            },
        }
    }
}
