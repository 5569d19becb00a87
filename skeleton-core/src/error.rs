//! Error types for the skeleton runtime core.
//!
//! Follows the propagation policy of the design: caller bugs (bad message
//! descriptors, unsupported callback shapes, nil required dependencies) are
//! detected at registration time and panic; everything that can legitimately
//! happen at runtime is returned here.

use std::io;
use thiserror::Error;

/// Top-level error for `skeleton-core` operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// ChanRPC server/client failure.
    #[error(transparent)]
    ChanRpc(#[from] crate::chanrpc::ChanRpcError),

    /// Timer dispatcher failure.
    #[error(transparent)]
    Timer(#[from] crate::timer::TimerError),

    /// Processor/codec failure.
    #[error(transparent)]
    Message(#[from] crate::message::MessageError),

    /// A dependency required at construction time was not supplied.
    #[error("required dependency missing: {0}")]
    NilDependency(&'static str),
}

/// Result alias for `skeleton-core` operations.
pub type Result<T> = std::result::Result<T, Error>;
