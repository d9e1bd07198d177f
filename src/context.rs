// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call cancellation and deadline, owned by the submitter.
///
/// This is the concrete stand-in for an opaque caller-supplied "context":
/// a [`CancellationToken`] the caller can cancel at any time, plus an
/// optional absolute deadline. Cloning a `RequestContext` shares the same
/// cancellation token (cancelling a clone cancels all of them), which is
/// the expected pattern when a context is derived for a sub-operation.
#[derive(Clone)]
pub struct RequestContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that is cancelled when `token` is cancelled.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: token,
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || self.is_expired()
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline elapses,
    /// yielding which of the two happened. Resolves immediately if the
    /// context is already cancelled or expired.
    pub(crate) async fn cancelled(&self) -> ContextOutcome {
        if self.is_expired() {
            return ContextOutcome::DeadlineExceeded;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancellation.cancelled() => ContextOutcome::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextOutcome::DeadlineExceeded,
                }
            }
            None => {
                self.cancellation.cancelled().await;
                ContextOutcome::Cancelled
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextOutcome {
    Cancelled,
    DeadlineExceeded,
}
