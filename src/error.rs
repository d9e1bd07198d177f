// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors a [`crate::Batcher`] can return to a submitter.
///
/// `Downstream` wraps the Sender's error behind an `Arc` rather than
/// requiring `E: Clone`, since the same error is delivered verbatim to every
/// submission sharing a failed batch.
#[derive(Error)]
pub enum BatcherError<E> {
    /// The supervisor has signalled shutdown, either before the submission
    /// was accepted or while it was still queued.
    #[error("batcher is unavailable: supervisor is shutting down")]
    Unavailable,

    /// The submitter's own context was cancelled before a reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The submitter's own context deadline elapsed before a reply arrived.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The Sender returned an error for the composed batch.
    #[error("downstream batch call failed: {0}")]
    Downstream(Arc<E>),

    /// The Sender returned a response whose length didn't match the
    /// request count of the batch it was given.
    #[error("bad batch response: expected {expected} sub-responses, got {actual}")]
    BadBatchResponse { expected: usize, actual: usize },
}

impl<E> BatcherError<E> {
    pub(crate) fn downstream(err: E) -> Self {
        Self::Downstream(Arc::new(err))
    }
}

// Manual impls because `derive(Clone/Debug)` would otherwise require `E:
// Clone + Debug`, which is unnecessarily restrictive given `Downstream`
// already stores the error behind an `Arc`.
impl<E> Clone for BatcherError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Unavailable => Self::Unavailable,
            Self::Cancelled => Self::Cancelled,
            Self::DeadlineExceeded => Self::DeadlineExceeded,
            Self::Downstream(e) => Self::Downstream(e.clone()),
            Self::BadBatchResponse { expected, actual } => Self::BadBatchResponse {
                expected: *expected,
                actual: *actual,
            },
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for BatcherError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            Self::Downstream(e) => f.debug_tuple("Downstream").field(e).finish(),
            Self::BadBatchResponse { expected, actual } => f
                .debug_struct("BadBatchResponse")
                .field("expected", expected)
                .field("actual", actual)
                .finish(),
        }
    }
}
