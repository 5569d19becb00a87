//! Skeleton Core
//!
//! Runtime-agnostic building blocks for a module's cooperative event loop:
//! - In-process RPC over a bounded channel (`chanrpc`)
//! - Message codec + id/type registry (`message`)
//! - Timing wheel + cron scheduling (`timer`)
//! - Worker-pool fan-out with structured callback (`go_helper`)
//! - Non-blocking task submission (`worker`)
//! - The per-module event loop (`skeleton`)
//! - Module lifecycle + orchestrator (`module`)
//! - Process-unique id generation (`id`)
//! - Signal-driven shutdown (`signal`)
//! - CAS-guarded tri-state status (`status`)
//! - Profiling HTTP mux seam (`profile`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod chanrpc;
pub mod error;
pub mod go_helper;
pub mod id;
pub mod message;
pub mod module;
pub mod profile;
pub mod reconnect;
pub mod signal;
pub mod skeleton;
pub mod status;
pub mod timer;
pub mod worker;

pub mod prelude {
    pub use crate::chanrpc::{Callback as ChanRpcCallback, ChanRpcError, Client as ChanRpcClient, Server as ChanRpcServer};
    pub use crate::error::{Error, Result};
    pub use crate::go_helper::GoHelper;
    pub use crate::id::{MonotonicId, SnowflakeId};
    pub use crate::message::{Codec, Endianness, JsonCodec, MessageError, Processor};
    pub use crate::module::{ClusterHandle, Module, Orchestrator, OrchestratorOptions, ReadyNotifier};
    pub use crate::profile::{NoopProfileHook, ProfileHook};
    pub use crate::skeleton::Skeleton;
    pub use crate::status::AtomicStatus;
    pub use crate::timer::{Dispatcher, TimerError};
    pub use crate::worker::WorkerPool;
}
