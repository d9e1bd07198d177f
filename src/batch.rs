// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::BatcherError;

/// One submission queued inside a [`PendingBatch`], waiting to be composed
/// into a downstream call.
///
/// The reply sender is `Option` so it can be taken out (and the
/// `.send(...).ok()` discipline applied) without requiring the whole
/// `Submission` to be consumed piecemeal; in practice it is always `Some`
/// until the pending batch is drained.
pub(crate) struct Submission<Req, Resp, E> {
    pub(crate) request: Req,
    pub(crate) reply: oneshot::Sender<Result<Resp, BatcherError<E>>>,
}

/// Per-destination accumulator: requests queued, deadlines, and the heap
/// bookkeeping needed to find this batch's entry among stale ones.
///
/// A `PendingBatch` exists for a destination iff at least one submission is
/// queued for it; the core loop removes the map entry the moment a batch is
/// dispatched or fully drained on shutdown.
pub(crate) struct PendingBatch<Req, Resp, E> {
    pub(crate) submissions: Vec<Submission<Req, Resp, E>>,
    pub(crate) start_time: Instant,
    pub(crate) last_updated: Instant,
    pub(crate) deadline: Option<Instant>,
    /// Set to a value handed down by the core loop every time `deadline` is
    /// recomputed, letting it tell a popped heap entry is stale without
    /// decrease-key support on the heap (see [`crate::heap`]). Must come
    /// from a counter that is never reset for the lifetime of the core
    /// loop: a destination gets a fresh [`PendingBatch`] every time its
    /// previous one is dispatched, so a counter that restarted at zero per
    /// batch could collide with a stale entry left behind by an earlier,
    /// already-dispatched batch for the same destination.
    pub(crate) generation: u64,
}

impl<Req, Resp, E> PendingBatch<Req, Resp, E> {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            submissions: Vec::new(),
            start_time: now,
            last_updated: now,
            deadline: None,
            generation: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.submissions.len()
    }

    /// Appends a submission, updating `last_updated` (and `start_time` if
    /// this is the first submission since the batch became empty).
    pub(crate) fn push(&mut self, submission: Submission<Req, Resp, E>, now: Instant) {
        if self.submissions.is_empty() {
            self.start_time = now;
        }
        self.last_updated = now;
        self.submissions.push(submission);
    }

    /// Recomputes `deadline` per `deadline == min(start_time + max_wait,
    /// last_updated + max_idle)`, using only the finite limits. Returns the
    /// new deadline (`None` if both are disabled, meaning only a size
    /// trigger can flush this batch) and records `generation`, a value the
    /// caller must draw from a counter that never resets (see the field
    /// doc on `generation`).
    pub(crate) fn recompute_deadline(
        &mut self,
        max_wait: Option<Duration>,
        max_idle: Option<Duration>,
        generation: u64,
    ) -> Option<Instant> {
        let from_wait = max_wait.map(|w| self.start_time + w);
        let from_idle = max_idle.map(|i| self.last_updated + i);
        let deadline = match (from_wait, from_idle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        self.deadline = deadline;
        self.generation = generation;
        deadline
    }

    /// Splits the batch into its composed request vector and its waiters,
    /// consuming it. This is what "dispatch" does to a pending batch before
    /// handing it to a worker.
    pub(crate) fn into_parts(self) -> (Vec<Req>, Vec<oneshot::Sender<Result<Resp, BatcherError<E>>>>) {
        let mut requests = Vec::with_capacity(self.submissions.len());
        let mut replies = Vec::with_capacity(self.submissions.len());
        for submission in self.submissions {
            requests.push(submission.request);
            replies.push(submission.reply);
        }
        (requests, replies)
    }
}
