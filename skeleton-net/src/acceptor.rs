//! TCP/WS server: an accept loop that turns each inbound socket into a
//! [`Connection`], wraps it in an [`Agent`] via an injected factory, and runs
//! the agent's lifecycle on the shared [`WorkerPool`].
//!
//! The accept loop and `close()` race each other with `futures::select!`
//! against a one-shot `flume` channel — the same runtime-agnostic
//! multiplexing idiom used for forwarding loops elsewhere in this crate —
//! rather than trying to cancel an in-flight `accept()` by force.

use crate::agent::{Agent, AgentFactory};
use crate::config::{TcpServerOptions, WsServerOptions};
use crate::connection::{Connection, TcpConnection, WsConnection};
use crate::error::{Error, Result};
use crate::tls::TlsConfigLoader;
use crate::ws;
use compio::net::{TcpListener, TcpStream};
use skeleton_core::status::AtomicStatus;
use skeleton_core::worker::WorkerPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Shared accept-loop bookkeeping: in-flight connection count and the
/// close-signal channel, factored out so the TCP and WS acceptors don't
/// duplicate the close/wait dance.
struct AcceptState {
    status: Arc<AtomicStatus>,
    conn_count: Arc<AtomicUsize>,
    close_tx: Mutex<Option<flume::Sender<()>>>,
    close_rx: flume::Receiver<()>,
    /// Registered so `close()` can `do_destroy` every connection that's
    /// currently idle between reads — it can't interrupt a read already
    /// blocked in the kernel, but it collapses the common case of a
    /// connection sitting idle waiting for its next frame.
    connections: Arc<Mutex<Vec<Arc<dyn Connection>>>>,
}

impl AcceptState {
    fn new() -> Self {
        let (close_tx, close_rx) = flume::bounded(1);
        Self {
            status: Arc::new(AtomicStatus::new()),
            conn_count: Arc::new(AtomicUsize::new(0)),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn register(&self, connection: Arc<dyn Connection>) {
        self.connections.lock().expect("connections mutex poisoned").push(connection);
    }

    async fn close(&self) {
        if !self.status.close_from_any() {
            return;
        }
        if let Some(tx) = self.close_tx.lock().expect("close-tx mutex poisoned").take() {
            let _ = tx.send(());
        }
        for connection in self.connections.lock().expect("connections mutex poisoned").drain(..) {
            connection.do_destroy();
        }
        while self.conn_count.load(Ordering::Acquire) > 0 {
            compio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn unregister_connection(connections: &Mutex<Vec<Arc<dyn Connection>>>, connection: &Arc<dyn Connection>) {
    let mut guard = connections.lock().expect("connections mutex poisoned");
    if let Some(pos) = guard.iter().position(|c| Arc::ptr_eq(c, connection)) {
        guard.swap_remove(pos);
    }
}

/// Drive one accepted connection's full lifecycle: `on_connect`, the read
/// loop, then `on_close`, decrementing `conn_count` once the session ends.
fn spawn_session(
    pool: &WorkerPool,
    conn_count: Arc<AtomicUsize>,
    connections: Arc<Mutex<Vec<Arc<dyn Connection>>>>,
    connection: Arc<dyn Connection>,
    agent: Arc<dyn Agent>,
) {
    pool.submit_future(async move {
        agent.on_connect().await;
        agent.run().await;
        agent.on_close().await;
        unregister_connection(&connections, &connection);
        conn_count.fetch_sub(1, Ordering::AcqRel);
    });
}

/// Plain-TCP acceptor, framing connections with the configured
/// [`crate::config::FrameOptions`].
pub struct TcpAcceptor {
    options: TcpServerOptions,
    pool: WorkerPool,
    agent_factory: AgentFactory,
    tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    state: AcceptState,
}

impl TcpAcceptor {
    #[must_use]
    pub fn new(
        options: TcpServerOptions,
        pool: WorkerPool,
        agent_factory: AgentFactory,
        tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    ) -> Self {
        Self {
            options,
            pool,
            agent_factory,
            tls_loader,
            state: AcceptState::new(),
        }
    }

    #[must_use]
    pub fn conn_count(&self) -> usize {
        self.state.conn_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.status.is_closed()
    }

    /// Bind and accept until closed or the retry budget is exhausted.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound, TLS is configured
    /// without a working [`TlsConfigLoader`], or the accept loop exceeds
    /// `max_retry` consecutive failures.
    pub async fn run(&self) -> Result<()> {
        if let Some(tls) = &self.options.tls {
            let loader = self.tls_loader.as_deref();
            match loader {
                Some(loader) => loader.validate(tls).await?,
                None => return Err(Error::TlsNotConfigured),
            }
        }

        let listener = TcpListener::bind(&self.options.addr).await.map_err(Error::Io)?;
        self.state.status.start();

        let mut backoff = INITIAL_BACKOFF;
        let mut retries = 0u32;

        loop {
            use futures::{select, FutureExt};
            select! {
                accepted = listener.accept().fuse() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            retries = 0;
                            backoff = INITIAL_BACKOFF;
                            self.handle_accept(stream);
                        }
                        Err(err) => {
                            retries += 1;
                            if retries > self.options.max_retry {
                                self.state.status.close_from_any();
                                return Err(Error::AcceptRetriesExhausted);
                            }
                            tracing::warn!(error = %err, retries, "tcp accept failed, backing off");
                            compio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
                _ = self.state.close_rx.recv_async().fuse() => {
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_accept(&self, stream: TcpStream) {
        if self.state.conn_count.load(Ordering::Acquire) >= self.options.max_conn {
            tracing::warn!(max_conn = self.options.max_conn, "tcp connection cap reached, dropping connection");
            drop(stream);
            return;
        }

        let connection = match TcpConnection::new(stream, self.options.frame, self.options.write_buffer, &self.pool) {
            Ok(c) => Arc::new(c) as Arc<dyn Connection>,
            Err(err) => {
                tracing::warn!(error = %err, "failed to wrap accepted tcp stream");
                return;
            }
        };

        self.state.conn_count.fetch_add(1, Ordering::AcqRel);
        self.state.register(connection.clone());
        let agent = (self.agent_factory)(connection.clone());
        spawn_session(&self.pool, self.state.conn_count.clone(), self.state.connections.clone(), connection, agent);
    }

    /// Idempotent: signal the accept loop to stop, then wait for every
    /// in-flight session to finish its lifecycle.
    pub async fn close(&self) {
        self.state.close().await;
    }
}

/// WebSocket acceptor: performs the RFC 6455 upgrade (bounded by
/// `handshake_timeout`) before handing the stream to a [`WsConnection`].
pub struct WsAcceptor {
    options: WsServerOptions,
    pool: WorkerPool,
    agent_factory: AgentFactory,
    tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    state: AcceptState,
}

impl WsAcceptor {
    #[must_use]
    pub fn new(
        options: WsServerOptions,
        pool: WorkerPool,
        agent_factory: AgentFactory,
        tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    ) -> Self {
        Self {
            options,
            pool,
            agent_factory,
            tls_loader,
            state: AcceptState::new(),
        }
    }

    #[must_use]
    pub fn conn_count(&self) -> usize {
        self.state.conn_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.status.is_closed()
    }

    /// # Errors
    /// Same conditions as [`TcpAcceptor::run`].
    pub async fn run(&self) -> Result<()> {
        if let Some(tls) = &self.options.tls {
            let loader = self.tls_loader.as_deref();
            match loader {
                Some(loader) => loader.validate(tls).await?,
                None => return Err(Error::TlsNotConfigured),
            }
        }

        let listener = TcpListener::bind(&self.options.addr).await.map_err(Error::Io)?;
        self.state.status.start();

        let mut backoff = INITIAL_BACKOFF;
        let mut retries = 0u32;

        loop {
            use futures::{select, FutureExt};
            select! {
                accepted = listener.accept().fuse() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            retries = 0;
                            backoff = INITIAL_BACKOFF;
                            self.handle_accept(stream);
                        }
                        Err(err) => {
                            retries += 1;
                            // WS has no max_retry knob in its options; mirror
                            // the TCP acceptor's backoff but never give up —
                            // a handful of bad accepts shouldn't take the
                            // whole gate down.
                            tracing::warn!(error = %err, retries, "ws accept failed, backing off");
                            compio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
                _ = self.state.close_rx.recv_async().fuse() => {
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_accept(&self, stream: TcpStream) {
        if self.state.conn_count.load(Ordering::Acquire) >= self.options.max_conn {
            tracing::warn!(max_conn = self.options.max_conn, "ws connection cap reached, dropping connection");
            drop(stream);
            return;
        }

        self.state.conn_count.fetch_add(1, Ordering::AcqRel);
        let pool = self.pool.clone();
        let agent_factory = self.agent_factory.clone();
        let msg_max_len = self.options.msg_max_len;
        let write_buffer = self.options.write_buffer;
        let handshake_timeout = self.options.handshake_timeout;
        let conn_count = self.state.conn_count.clone();
        let connections = self.state.connections.clone();

        pool.submit_future(async move {
            let mut stream = stream;
            let handshake = ws::accept_handshake(&mut stream);
            let upgraded = {
                use futures::{select, FutureExt};
                select! {
                    result = handshake.fuse() => result,
                    _ = compio::time::sleep(handshake_timeout).fuse() => Err(crate::error::Error::Ws(crate::error::WsError::HandshakeTimeout)),
                }
            };
            if let Err(err) = upgraded {
                tracing::warn!(error = %err, "ws handshake failed");
                conn_count.fetch_sub(1, Ordering::AcqRel);
                return;
            }

            let connection = match WsConnection::new(stream, true, msg_max_len, write_buffer, &pool) {
                Ok(c) => Arc::new(c) as Arc<dyn Connection>,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to wrap upgraded ws stream");
                    conn_count.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            };

            connections.lock().expect("connections mutex poisoned").push(connection.clone());
            let agent = (agent_factory)(connection.clone());
            agent.on_connect().await;
            agent.run().await;
            agent.on_close().await;
            unregister_connection(&connections, &connection);
            conn_count.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Idempotent: signal the accept loop to stop, then wait for every
    /// in-flight session (including any still mid-handshake) to finish.
    pub async fn close(&self) {
        self.state.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::GateAgent;
    use skeleton_core::message::{Endianness, JsonCodec, Processor};
    use std::sync::atomic::AtomicBool;

    fn noop_factory(processor: Arc<Processor<Arc<GateAgent>>>, pool: WorkerPool) -> AgentFactory {
        Arc::new(move |connection| {
            let agent = GateAgent::new(connection, processor.clone(), pool.clone());
            agent.bind_self_handle();
            agent as Arc<dyn Agent>
        })
    }

    #[compio::test]
    async fn tcp_acceptor_accepts_a_connection_and_tracks_conn_count() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let pool = WorkerPool::unbounded();
        let processor: Arc<Processor<Arc<GateAgent>>> = Arc::new(Processor::new(Arc::new(JsonCodec), Endianness::Big));

        let acceptor = Arc::new(TcpAcceptor::new(
            crate::config::TcpServerOptions::new(format!("127.0.0.1:{port}")),
            pool.clone(),
            noop_factory(processor, pool.clone()),
            None,
        ));
        let run_acceptor = acceptor.clone();
        pool.submit_future(async move {
            let _ = run_acceptor.run().await;
        });

        // Give the listener a moment to bind.
        compio::time::sleep(Duration::from_millis(20)).await;
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let connected = Arc::new(AtomicBool::new(false));
        for _ in 0..200 {
            if acceptor.conn_count() > 0 {
                connected.store(true, Ordering::SeqCst);
                break;
            }
            compio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(connected.load(Ordering::SeqCst));
        drop(client);
        acceptor.close().await;
        assert!(acceptor.is_closed());
    }
}
