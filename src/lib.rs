// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! `range-batcher` coalesces many independently submitted requests, each
//! targeting a logical destination (for example a key range on a remote
//! shard), into fewer multi-request calls against a downstream transport.
//!
//! The downstream transport is expensive per call and cheap per extra
//! element in the call, so batching amortizes the per-call overhead while a
//! bounded flush delay keeps tail latency in check. The crate does not know
//! or care what the destination, request or response types mean; it only
//! needs to be able to hash/compare destinations and to concatenate and
//! split requests and responses respectively, both of which it does with
//! plain `Vec`s.
//!
//! Everything this crate talks to is reached through a trait:
//! [`Sender`] performs the actual downstream call, and [`Supervisor`]
//! supplies a process-wide shutdown signal plus a place to register
//! supervised background work. Neither is implemented here; callers bring
//! their own.

mod batch;
mod batcher;
mod config;
mod context;
mod core;
mod dispatch;
mod error;
mod heap;
mod metrics;
mod sender;
mod supervisor;

pub use batcher::Batcher;
pub use config::{Config, ConfigBuilder};
pub use context::RequestContext;
pub use error::BatcherError;
pub use metrics::BatcherMetrics;
pub use sender::Sender;
pub use supervisor::{Supervisor, TokioSupervisor};
