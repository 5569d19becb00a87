//! Crate-wide error type for the connection pipeline.

use thiserror::Error;

/// Frame parser errors, narrow enough to be useful at the `Packet`/`UnPacket`
/// boundary without pulling in the whole-crate [`Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("message body shorter than the configured minimum length")]
    MessageTooShort,
    #[error("message body longer than the configured maximum length")]
    MessageTooLong,
}

/// WebSocket handshake and frame-codec errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    #[error("handshake request was not a GET")]
    NotGet,
    #[error("handshake is missing the Sec-WebSocket-Key header")]
    MissingKey,
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("frame exceeds the configured maximum message length")]
    MessageTooLong,
    #[error("received a malformed frame")]
    MalformedFrame,
    #[error("peer closed the connection")]
    ConnectionClosed,
}

/// Errors surfaced by the connection pipeline (framing, connections,
/// acceptors, dialers, the gate).
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Ws(#[from] WsError),
    #[error(transparent)]
    Message(#[from] skeleton_core::message::MessageError),
    #[error("connection is closed")]
    ConnClosed,
    #[error("listener accepted past the configured connection cap")]
    ConnCapReached,
    #[error("accept loop exceeded its retry budget")]
    AcceptRetriesExhausted,
    #[error("dial loop exceeded its retry budget")]
    DialRetriesExhausted,
    #[error("TLS was requested but no TlsConfigLoader is wired in")]
    TlsNotConfigured,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
