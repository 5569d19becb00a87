//! The reference "network-facing module": wires a TCP and/or WS acceptor to
//! a shared [`Processor`] and exposes connection lifecycle to the rest of
//! the application only through [`AgentHook`] — game-logic modules never see
//! a raw [`Connection`], only chanRPC calls the hook's own handlers choose
//! to make.

use crate::acceptor::{TcpAcceptor, WsAcceptor};
use crate::agent::{Agent, AgentFactory, GateAgent};
use crate::config::{TcpServerOptions, WsServerOptions};
use crate::connection::Connection;
use crate::tls::TlsConfigLoader;
use async_trait::async_trait;
use skeleton_core::message::Processor;
use skeleton_core::module::{Module, ReadyNotifier};
use skeleton_core::worker::WorkerPool;
use std::sync::Arc;

/// Connection-lifecycle hooks a game module registers with a [`Gate`].
/// Called in whatever task happens to be running the agent's session —
/// never on a dedicated "gate thread", since there isn't one.
#[async_trait]
pub trait AgentHook: Send + Sync {
    async fn on_connect(&self, agent: Arc<GateAgent>);
    async fn on_close(&self, agent: Arc<GateAgent>);
}

/// An [`AgentHook`] that does nothing, for a `Gate` with no lifecycle
/// bookkeeping of its own (e.g. the cluster fabric in
/// [`crate::cluster`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAgentHook;

#[async_trait]
impl AgentHook for NoopAgentHook {
    async fn on_connect(&self, _agent: Arc<GateAgent>) {}
    async fn on_close(&self, _agent: Arc<GateAgent>) {}
}

/// Wraps a [`GateAgent`] so the acceptor/dialer's own `on_connect`/`on_close`
/// calls also reach the gate's [`AgentHook`].
struct HookedAgent {
    inner: Arc<GateAgent>,
    hook: Arc<dyn AgentHook>,
}

#[async_trait]
impl Agent for HookedAgent {
    async fn on_connect(&self) {
        self.inner.on_connect().await;
        self.hook.on_connect(self.inner.clone()).await;
    }

    async fn run(&self) {
        self.inner.run().await;
    }

    async fn on_close(&self) {
        self.inner.on_close().await;
        self.hook.on_close(self.inner.clone()).await;
    }

    fn connection(&self) -> &(dyn Connection + '_) {
        self.inner.connection()
    }
}

fn hooked_agent_factory(processor: Arc<Processor<Arc<GateAgent>>>, pool: WorkerPool, hook: Arc<dyn AgentHook>) -> AgentFactory {
    Arc::new(move |connection| {
        let inner = GateAgent::new(connection, processor.clone(), pool.clone());
        inner.bind_self_handle();
        Arc::new(HookedAgent { inner, hook: hook.clone() }) as Arc<dyn Agent>
    })
}

/// Composes a TCP acceptor, a WS acceptor, or both, over one shared
/// [`Processor`]. A deployment with no listen address configured for a
/// transport simply omits that acceptor.
pub struct Gate {
    processor: Arc<Processor<Arc<GateAgent>>>,
    pool: WorkerPool,
    tcp: Option<TcpAcceptor>,
    ws: Option<WsAcceptor>,
}

impl Gate {
    #[must_use]
    pub fn new(
        processor: Arc<Processor<Arc<GateAgent>>>,
        pool: WorkerPool,
        hook: Arc<dyn AgentHook>,
        tcp_options: Option<TcpServerOptions>,
        ws_options: Option<WsServerOptions>,
        tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    ) -> Self {
        let factory = hooked_agent_factory(processor.clone(), pool.clone(), hook);
        Self {
            processor,
            tcp: tcp_options.map(|o| TcpAcceptor::new(o, pool.clone(), factory.clone(), tls_loader.clone())),
            ws: ws_options.map(|o| WsAcceptor::new(o, pool.clone(), factory, tls_loader)),
            pool,
        }
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<Processor<Arc<GateAgent>>> {
        &self.processor
    }

    #[must_use]
    pub fn conn_count(&self) -> usize {
        self.tcp.as_ref().map_or(0, TcpAcceptor::conn_count) + self.ws.as_ref().map_or(0, WsAcceptor::conn_count)
    }
}

#[async_trait]
impl Module for Gate {
    fn init(&self) -> skeleton_core::error::Result<()> {
        Ok(())
    }

    async fn run(&self, ready: ReadyNotifier) {
        // `Gate::run` itself is what the orchestrator spawns onto the pool,
        // so the acceptors' loops just run inline here rather than being
        // handed off again.
        let mut tcp_fut = None;
        let mut ws_fut = None;
        if let Some(tcp) = &self.tcp {
            tcp_fut = Some(tcp.run());
        }
        if let Some(ws) = &self.ws {
            ws_fut = Some(ws.run());
        }
        ready.notify();

        match (tcp_fut, ws_fut) {
            (Some(t), Some(w)) => {
                let (tr, wr) = futures::join!(t, w);
                if let Err(err) = tr {
                    tracing::error!(error = %err, "tcp acceptor exited");
                }
                if let Err(err) = wr {
                    tracing::error!(error = %err, "ws acceptor exited");
                }
            }
            (Some(t), None) => {
                if let Err(err) = t.await {
                    tracing::error!(error = %err, "tcp acceptor exited");
                }
            }
            (None, Some(w)) => {
                if let Err(err) = w.await {
                    tracing::error!(error = %err, "ws acceptor exited");
                }
            }
            (None, None) => {}
        }
    }

    async fn destroy(&self) {
        if let Some(tcp) = &self.tcp {
            tcp.close().await;
        }
        if let Some(ws) = &self.ws {
            ws.close().await;
        }
    }
}

/// Convenience for registering a message type on a gate's processor with a
/// direct handler — the common case where a game module wants to answer a
/// request inline rather than route it through a chanRPC server keyed by
/// [`TypeId`].
pub fn register_handler<T>(gate: &Gate, id: u16, handler: Arc<dyn Fn(Box<dyn std::any::Any + Send>, Arc<GateAgent>) + Send + Sync>) -> Result<(), skeleton_core::message::MessageError>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    gate.processor.register::<T>(id, None, Some(handler))
}
