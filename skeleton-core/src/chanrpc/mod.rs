//! In-process RPC whose transport is a bounded channel, not a socket.
//!
//! A [`Server`] belongs to exactly one module and owns the `id -> function`
//! table; a [`Client`] is a caller's handle onto a server, used either from
//! another module's skeleton loop or a throwaway one-shot handle (see
//! `Server::call0`/`call1`/`call_n`). Unlike the source this glues together,
//! function shape is not discriminated at runtime: `call0`/`call1`/`call_n`
//! are three distinct operations that cannot be mixed up at a call site.

mod client;
mod server;

pub use client::{Callback, Client};
pub use server::{CallInfo, Exec, Server};

use std::any::Any;
use thiserror::Error;

/// Type-erased argument bundle passed into a registered function.
pub type Args = Box<dyn Any + Send>;

/// What a `call1`/`call_n` registration hands back on success.
#[derive(Debug)]
pub enum Reply {
    /// `call0` produced nothing.
    None,
    /// `call1` produced one value.
    One(Box<dyn Any + Send>),
    /// `call_n` produced a variable-length result list.
    Many(Vec<Box<dyn Any + Send>>),
}

/// Outcome of one RPC: a reply plus propagated error, matching the source's
/// `Result{value, err}` pairing (both may carry information simultaneously
/// for `call_n`-shaped functions that partially succeed).
pub type CallResult = std::result::Result<Reply, ChanRpcError>;

/// What travels over a reply channel: the call's outcome, plus an opaque,
/// type-erased callback the server never interprets — it only round-trips
/// whatever the caller attached to the originating `CallInfo` back to that
/// same caller. This is how `AsynCall`'s three callback shapes survive the
/// trip through a server that has no idea callbacks exist.
pub struct Envelope {
    pub result: CallResult,
    pub cb: Option<Args>,
}

/// Errors surfaced by chanRPC servers and clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChanRpcError {
    /// `Register` was called with an id that already has a function.
    #[error("function already registered for this id")]
    RepeatedRegister,
    /// A non-blocking `call` found the queue full.
    #[error("call queue is full")]
    FullChannel,
    /// The server had already been closed when the call was attempted.
    #[error("server is closed")]
    ServerClosed,
    /// A client issued a call but has no server attached.
    #[error("client has no server attached")]
    ServerNotAttached,
    /// An async client had `pendingAsync >= cap(asyncChan)` at call time.
    #[error("too many outstanding async calls")]
    TooManyCalls,
    /// The registered function panicked; message is the recovered payload.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),
    /// `Go`/`call` targeted an id with nothing registered — not itself an
    /// error condition for `Go` (which is a silent no-op), but `call0`/
    /// `call1`/`call_n` surface it because they always expect a reply.
    #[error("no function registered for this id")]
    NotRegistered,
}
