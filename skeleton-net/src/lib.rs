//! # skeleton-net
//!
//! TCP/WebSocket connection pipeline for the skeleton game-server runtime:
//! length-prefixed and RFC 6455 framing, an `Agent` read loop, and the
//! `Acceptor`/`Dialer` machinery that turns listen addresses and peer
//! addresses into running sessions.
//!
//! This crate is deliberately silent about application protocol: `Gate`
//! wires a shared [`skeleton_core::message::Processor`] to an acceptor and
//! exposes connection lifecycle only through [`gate::AgentHook`] callbacks.
//! [`cluster::Cluster`] reuses the same Acceptor/Dialer machinery for a
//! cross-process fabric that carries no protocol of its own.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::needless_pass_by_ref_mut)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::unused_async)]
#![allow(clippy::let_underscore_future)]
#![allow(clippy::future_not_send)] // compio futures are not Send by default
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::while_let_loop)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::never_loop)]

pub mod acceptor;
pub mod agent;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod dialer;
pub mod error;
pub mod frame;
pub mod gate;
pub mod tcp_opts;
pub mod tls;
pub mod ws;

pub use acceptor::{TcpAcceptor, WsAcceptor};
pub use agent::{Agent, AgentFactory, GateAgent};
pub use cluster::Cluster;
pub use connection::{Connection, TcpConnection, WsConnection};
pub use dialer::{TcpDialer, WsDialer};
pub use error::{Error, Result};
pub use gate::{AgentHook, Gate, NoopAgentHook};
pub use tls::{NoTlsConfigLoader, TlsConfigLoader};

/// Convenient imports for a deployment wiring up a [`Gate`]/[`Cluster`].
///
/// ```rust,ignore
/// use skeleton_net::prelude::*;
/// ```
pub mod prelude {
    pub use super::config::{
        FrameOptions, HeaderLen, TcpClientOptions, TcpServerOptions, TlsOptions, WsClientOptions, WsServerOptions,
    };
    pub use super::{
        Agent, AgentFactory, AgentHook, Cluster, Connection, Error, Gate, GateAgent, NoTlsConfigLoader, Result,
        TcpAcceptor, TcpConnection, TcpDialer, TlsConfigLoader, WsAcceptor, WsConnection, WsDialer,
    };
}
