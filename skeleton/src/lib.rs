//! # skeleton
//!
//! A modular TCP/WebSocket game-server runtime: a cooperative module event
//! loop, in-process chanRPC, and a connection pipeline (frame parsing, a
//! `Gate` that drives it through a message `Processor`, and a minimal
//! `Cluster` fabric for cross-process TCP pipes).
//!
//! ## Architecture
//!
//! - **`skeleton-core`**: runtime-agnostic building blocks — chanRPC,
//!   the message codec/registry, the timing wheel, the worker pool, the
//!   per-module event loop, and the `Module`/`Orchestrator` lifecycle.
//! - **`skeleton-net`**: the TCP/WebSocket connection pipeline — framing,
//!   the `Agent` read loop, `Acceptor`/`Dialer`, `Gate`, and `Cluster`.
//! - **`skeleton`** (this crate): wires the two together into one
//!   dependency and re-exports the public surface an application needs.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use skeleton::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = WorkerPool::unbounded();
//! let processor = Arc::new(Processor::new(Arc::new(JsonCodec), Endianness::Big));
//! let gate = Arc::new(Gate::new(
//!     processor,
//!     pool.clone(),
//!     Arc::new(NoopAgentHook),
//!     Some(TcpServerOptions::new("0.0.0.0:9000")),
//!     None,
//!     None,
//! ));
//!
//! let mut orchestrator = Orchestrator::new(pool, Arc::new(MonotonicId::new()));
//! orchestrator.register(gate);
//! orchestrator.start().await?;
//! wait_for_shutdown_signal().await;
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)] // compio futures are not Send by default
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub use skeleton_core;
pub use skeleton_net;

pub use bytes::Bytes;

/// Development helper: initialize tracing from `RUST_LOG` for benches/tests.
pub mod dev_tracing;

/// Convenient imports for a deployment wiring up modules under an
/// [`skeleton_core::module::Orchestrator`].
pub mod prelude {
    pub use skeleton_core::chanrpc::{Callback as ChanRpcCallback, ChanRpcError, Client as ChanRpcClient, Server as ChanRpcServer};
    pub use skeleton_core::error::{Error, Result};
    pub use skeleton_core::go_helper::GoHelper;
    pub use skeleton_core::id::{MonotonicId, SnowflakeId};
    pub use skeleton_core::message::{Codec, Endianness, JsonCodec, MessageError, Processor};
    pub use skeleton_core::module::{ClusterHandle, Module, Orchestrator, OrchestratorOptions, ReadyNotifier};
    pub use skeleton_core::profile::{NoopProfileHook, ProfileHook};
    pub use skeleton_core::signal::wait_for_shutdown_signal;
    pub use skeleton_core::skeleton::Skeleton;
    pub use skeleton_core::status::AtomicStatus;
    pub use skeleton_core::timer::{Dispatcher, TimerError};
    pub use skeleton_core::worker::WorkerPool;

    pub use skeleton_net::config::{
        FrameOptions, HeaderLen, TcpClientOptions, TcpServerOptions, TlsOptions, WsClientOptions, WsServerOptions,
    };
    pub use skeleton_net::gate::NoopAgentHook;
    pub use skeleton_net::{
        Agent, AgentFactory, AgentHook, Cluster, Connection, Gate, GateAgent, NoTlsConfigLoader, TcpAcceptor,
        TcpConnection, TcpDialer, TlsConfigLoader, WsAcceptor, WsConnection, WsDialer,
    };
}
