// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::context::RequestContext;

/// The downstream transport a [`crate::Batcher`] dispatches composed
/// batches to.
///
/// A non-error return must carry exactly one response per request, in the
/// same order the requests were given. An error return means no partial
/// success is observable: the batcher will deliver the same error to every
/// submission in the batch.
#[async_trait]
pub trait Sender: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;
    type Error: Send + Sync + 'static;

    /// Performs one downstream call with the composed batch.
    ///
    /// `ctx` is derived from the batcher's own lifetime, not from any
    /// individual submission's context: cancelling one submitter must not
    /// abort the call for the rest of the batch.
    async fn send(
        &self,
        ctx: &RequestContext,
        batch: Vec<Self::Request>,
    ) -> Result<Vec<Self::Response>, Self::Error>;
}
