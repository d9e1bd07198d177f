// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::warn;

use crate::context::RequestContext;
use crate::error::BatcherError;
use crate::metrics::BatcherMetrics;
use crate::sender::Sender;

/// Runs one dispatch: invokes the Sender with the composed batch, splits or
/// forwards the result to every waiter, then releases the backpressure
/// permit (if any) and signals completion.
///
/// This is spawned as its own supervised task per in-flight batch (4.3); it
/// never touches the core loop's state directly, only through
/// `completion_tx`, so it needs no lock over the pending-batch map or heap.
pub(crate) async fn run<S: Sender>(
    sender: Arc<S>,
    ctx: RequestContext,
    requests: Vec<S::Request>,
    replies: Vec<oneshot::Sender<Result<S::Response, BatcherError<S::Error>>>>,
    permit: Option<OwnedSemaphorePermit>,
    completion_tx: tokio::sync::mpsc::UnboundedSender<()>,
    metrics: Option<Arc<BatcherMetrics>>,
) {
    let expected = requests.len();
    let started_at = Instant::now();

    let result = sender.send(&ctx, requests).await;

    if let Some(metrics) = &metrics {
        metrics.dispatched_batch_size.observe(expected as f64);
        metrics
            .dispatch_latency_seconds
            .observe(started_at.elapsed().as_secs_f64());
    }

    match result {
        Ok(responses) if responses.len() == expected => {
            for (reply, response) in replies.into_iter().zip(responses) {
                let _ = reply.send(Ok(response));
            }
        }
        Ok(responses) => {
            let actual = responses.len();
            warn!(expected, actual, "Sender returned a bad batch response");
            let err = BatcherError::BadBatchResponse { expected, actual };
            for reply in replies {
                let _ = reply.send(Err(err.clone()));
            }
        }
        Err(e) => {
            let err = BatcherError::downstream(e);
            for reply in replies {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }

    // Drop order matters: release the backpressure slot before announcing
    // completion, so a core loop woken by the completion signal can
    // immediately dispatch the next batch into the freed slot.
    drop(permit);
    let _ = completion_tx.send(());
}
