// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// External lifecycle owner: provides a process-wide shutdown signal and a
/// place to register long-running work that must exit on shutdown.
///
/// The batcher never constructs a `Supervisor` itself; it is handed one at
/// construction and treats it purely as a collaborator.
#[async_trait]
pub trait Supervisor: Send + Sync + 'static {
    /// Resolves once the process should begin quiescing. Safe to call
    /// concurrently and repeatedly; every call observes the same signal.
    async fn should_quiesce(&self);

    /// Registers `fut` as supervised background work tagged `name`. The
    /// supervisor is not required to cancel `fut` on shutdown: callers that
    /// need bounded shutdown latency should make `fut` itself observe
    /// [`Supervisor::should_quiesce`].
    fn spawn_supervised(&self, name: &'static str, fut: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// A minimal [`Supervisor`] backed by a [`CancellationToken`] and a
/// [`JoinSet`], suitable for a single-process embedding of the batcher or
/// for tests.
///
/// Dropping the last clone of the token returned by [`TokioSupervisor::token`]
/// does *not* trigger shutdown; call [`TokioSupervisor::shutdown`] (or
/// cancel a token obtained from [`TokioSupervisor::new_with_token`])
/// explicitly instead.
pub struct TokioSupervisor {
    token: CancellationToken,
    tasks: parking_lot::Mutex<JoinSet<()>>,
    /// Name each task was registered under, keyed by its `JoinSet` task id,
    /// so a panic observed in `join_all` can be attributed to the name the
    /// caller passed to `spawn_supervised` rather than logged anonymously.
    names: parking_lot::Mutex<HashMap<Id, &'static str>>,
}

impl TokioSupervisor {
    pub fn new() -> Self {
        Self::new_with_token(CancellationToken::new())
    }

    /// Builds a supervisor whose shutdown signal is `token`, so the caller
    /// can trigger shutdown from outside without going through `shutdown()`.
    pub fn new_with_token(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: parking_lot::Mutex::new(JoinSet::new()),
            names: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signals shutdown to every `should_quiesce` waiter.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Awaits completion of every task registered via `spawn_supervised`.
    /// Used by callers (and tests) that want to observe P6 shutdown
    /// liveness deterministically.
    pub async fn join_all(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock();
            std::mem::replace(&mut *guard, JoinSet::new())
        };
        while let Some(res) = tasks.join_next_with_id().await {
            match res {
                Ok((id, ())) => {
                    self.names.lock().remove(&id);
                }
                Err(err) => {
                    let name = self.names.lock().remove(&err.id()).unwrap_or("<unnamed>");
                    warn!(name, %err, "supervised task panicked");
                }
            }
        }
    }
}

impl Default for TokioSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for TokioSupervisor {
    async fn should_quiesce(&self) {
        self.token.cancelled().await;
    }

    fn spawn_supervised(&self, name: &'static str, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        let abort_handle = self.tasks.lock().spawn(async move {
            fut.await;
        });
        self.names.lock().insert(abort_handle.id(), name);
    }
}
