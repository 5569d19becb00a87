//! TCP/WS client: maintains up to `conn_num` outbound sessions, each
//! redialing (bounded retries, exponential backoff) and optionally
//! reconnecting forever once a session ends.
//!
//! Unlike the acceptor's single accept-loop task, a dialer runs `conn_num`
//! independent per-slot tasks concurrently, so close-signaling can't rely on
//! a single-consumer channel (`flume::Receiver::recv_async` only wakes one
//! waiter per send). Each slot instead polls [`AtomicStatus::is_closed`]
//! between short sleep increments — the same spin-and-check idiom this
//! crate already uses to wait out a shutdown.

use crate::agent::{Agent, AgentFactory};
use crate::config::{TcpClientOptions, WsClientOptions};
use crate::connection::{Connection, TcpConnection, WsConnection};
use crate::error::{Error, Result};
use crate::tls::TlsConfigLoader;
use compio::net::TcpStream;
use skeleton_core::reconnect::ReconnectState;
use skeleton_core::status::AtomicStatus;
use skeleton_core::worker::WorkerPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RECONNECT_BASE: Duration = Duration::from_millis(100);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
const MAX_DIAL_ATTEMPTS: u32 = 3;
const POLL_STEP: Duration = Duration::from_millis(50);

/// Sleep for `duration`, but return early (after at most one `POLL_STEP`) if
/// `status` closes — used everywhere a dial slot would otherwise block past
/// a requested shutdown.
async fn interruptible_sleep(duration: Duration, status: &AtomicStatus) {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if status.is_closed() {
            return;
        }
        let step = remaining.min(POLL_STEP);
        compio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

/// Try to connect to `addr` up to [`MAX_DIAL_ATTEMPTS`] times with
/// exponential backoff, bailing out early if `status` closes.
async fn dial_with_retry(addr: &str, status: &AtomicStatus) -> Option<TcpStream> {
    let mut reconnect = ReconnectState::new(RECONNECT_BASE, RECONNECT_MAX);
    for attempt in 1..=MAX_DIAL_ATTEMPTS {
        if status.is_closed() {
            return None;
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => return Some(stream),
            Err(err) => {
                tracing::warn!(error = %err, attempt, "dial attempt failed");
                interruptible_sleep(reconnect.next_delay(), status).await;
            }
        }
    }
    None
}

/// Shared dialer bookkeeping, mirroring [`crate::acceptor::AcceptState`].
struct DialState {
    status: Arc<AtomicStatus>,
    active: Arc<AtomicUsize>,
    connections: Arc<Mutex<Vec<Arc<dyn Connection>>>>,
}

impl DialState {
    fn new() -> Self {
        Self {
            status: Arc::new(AtomicStatus::new()),
            active: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn close(&self) {
        if !self.status.close_from_any() {
            return;
        }
        for connection in self.connections.lock().expect("connections mutex poisoned").drain(..) {
            connection.do_destroy();
        }
        while self.active.load(Ordering::Acquire) > 0 {
            compio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn unregister(connections: &Mutex<Vec<Arc<dyn Connection>>>, connection: &Arc<dyn Connection>) {
    let mut guard = connections.lock().expect("connections mutex poisoned");
    if let Some(pos) = guard.iter().position(|c| Arc::ptr_eq(c, connection)) {
        guard.swap_remove(pos);
    }
}

/// Plain-TCP dialer.
pub struct TcpDialer {
    options: TcpClientOptions,
    pool: WorkerPool,
    agent_factory: AgentFactory,
    tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    state: DialState,
}

impl TcpDialer {
    #[must_use]
    pub fn new(
        options: TcpClientOptions,
        pool: WorkerPool,
        agent_factory: AgentFactory,
        tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    ) -> Self {
        Self {
            options,
            pool,
            agent_factory,
            tls_loader,
            state: DialState::new(),
        }
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.status.is_closed()
    }

    /// Start `conn_num` independent reconnect loops. Returns once every slot
    /// has been spawned — the sessions themselves keep running on the shared
    /// pool until they end or [`TcpDialer::close`] is called.
    ///
    /// # Errors
    /// Returns an error if TLS is configured without a working
    /// [`TlsConfigLoader`].
    pub async fn run(&self) -> Result<()> {
        if let Some(tls) = &self.options.tls {
            let loader = self.tls_loader.as_deref();
            match loader {
                Some(loader) => loader.validate(tls).await?,
                None => return Err(Error::TlsNotConfigured),
            }
        }

        self.state.status.start();
        for _ in 0..self.options.conn_num {
            self.state.active.fetch_add(1, Ordering::AcqRel);
            let addr = self.options.addr.clone();
            let frame = self.options.frame;
            let write_buffer = self.options.write_buffer;
            let auto_reconnect = self.options.auto_reconnect;
            let connect_interval = self.options.connect_interval;
            let pool = self.pool.clone();
            let agent_factory = self.agent_factory.clone();
            let status = self.state.status.clone();
            let active = self.state.active.clone();
            let connections = self.state.connections.clone();

            self.pool.submit_future(async move {
                loop {
                    if status.is_closed() {
                        break;
                    }
                    let Some(stream) = dial_with_retry(&addr, &status).await else {
                        if !auto_reconnect {
                            break;
                        }
                        interruptible_sleep(connect_interval, &status).await;
                        continue;
                    };

                    let connection = match TcpConnection::new(stream, frame, write_buffer, &pool) {
                        Ok(c) => Arc::new(c) as Arc<dyn Connection>,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to wrap dialed tcp stream");
                            interruptible_sleep(connect_interval, &status).await;
                            continue;
                        }
                    };

                    connections.lock().expect("connections mutex poisoned").push(connection.clone());
                    let agent = (agent_factory)(connection.clone());
                    agent.on_connect().await;
                    agent.run().await;
                    agent.on_close().await;
                    unregister(&connections, &connection);

                    if !auto_reconnect || status.is_closed() {
                        break;
                    }
                    interruptible_sleep(connect_interval, &status).await;
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });
        }
        Ok(())
    }

    /// Idempotent: signals every reconnect loop to stop, `do_destroy`s every
    /// connection currently idle between reads, then waits for all slots to
    /// exit.
    pub async fn close(&self) {
        self.state.close().await;
    }
}

/// WebSocket dialer: same reconnect-loop shape as [`TcpDialer`], but performs
/// the client-side RFC 6455 upgrade before constructing the [`Connection`].
pub struct WsDialer {
    options: WsClientOptions,
    pool: WorkerPool,
    agent_factory: AgentFactory,
    tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    state: DialState,
}

impl WsDialer {
    #[must_use]
    pub fn new(
        options: WsClientOptions,
        pool: WorkerPool,
        agent_factory: AgentFactory,
        tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    ) -> Self {
        Self {
            options,
            pool,
            agent_factory,
            tls_loader,
            state: DialState::new(),
        }
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.status.is_closed()
    }

    /// # Errors
    /// Same conditions as [`TcpDialer::run`].
    pub async fn run(&self) -> Result<()> {
        if let Some(tls) = &self.options.tls {
            let loader = self.tls_loader.as_deref();
            match loader {
                Some(loader) => loader.validate(tls).await?,
                None => return Err(Error::TlsNotConfigured),
            }
        }

        self.state.status.start();
        for _ in 0..self.options.conn_num {
            self.state.active.fetch_add(1, Ordering::AcqRel);
            let addr = self.options.addr.clone();
            let msg_max_len = self.options.msg_max_len;
            let write_buffer = self.options.write_buffer;
            let auto_reconnect = self.options.auto_reconnect;
            let connect_interval = self.options.connect_interval;
            let pool = self.pool.clone();
            let agent_factory = self.agent_factory.clone();
            let status = self.state.status.clone();
            let active = self.state.active.clone();
            let connections = self.state.connections.clone();

            self.pool.submit_future(async move {
                loop {
                    if status.is_closed() {
                        break;
                    }
                    let Some(mut stream) = dial_with_retry(&addr, &status).await else {
                        if !auto_reconnect {
                            break;
                        }
                        interruptible_sleep(connect_interval, &status).await;
                        continue;
                    };

                    if let Err(err) = client_handshake(&mut stream, &addr).await {
                        tracing::warn!(error = %err, "ws client handshake failed");
                        if !auto_reconnect {
                            break;
                        }
                        interruptible_sleep(connect_interval, &status).await;
                        continue;
                    }

                    let connection = match WsConnection::new(stream, false, msg_max_len, write_buffer, &pool) {
                        Ok(c) => Arc::new(c) as Arc<dyn Connection>,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to wrap dialed ws stream");
                            interruptible_sleep(connect_interval, &status).await;
                            continue;
                        }
                    };

                    connections.lock().expect("connections mutex poisoned").push(connection.clone());
                    let agent = (agent_factory)(connection.clone());
                    agent.on_connect().await;
                    agent.run().await;
                    agent.on_close().await;
                    unregister(&connections, &connection);

                    if !auto_reconnect || status.is_closed() {
                        break;
                    }
                    interruptible_sleep(connect_interval, &status).await;
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });
        }
        Ok(())
    }

    /// Idempotent, same shape as [`TcpDialer::close`].
    pub async fn close(&self) {
        self.state.close().await;
    }
}

/// Write the client-side HTTP upgrade request and check for a `101` reply.
/// Only a sequential read-then-write, same as the server half in
/// [`crate::ws::accept_handshake`].
async fn client_handshake(stream: &mut TcpStream, addr: &str) -> Result<()> {
    use base64::Engine;
    use compio::buf::BufResult;
    use compio::io::{AsyncReadExt, AsyncWriteExt};

    let key_bytes: [u8; 16] = rand::random();
    let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\n\r\n"
    );
    let BufResult(result, _) = stream.write_all(request.into_bytes()).await;
    result.map_err(Error::Io)?;

    let mut response = Vec::new();
    loop {
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        let byte = vec![0u8; 1];
        let BufResult(result, byte) = stream.read_exact(byte).await;
        result.map_err(Error::Io)?;
        response.extend_from_slice(&byte);
    }

    let status_line = String::from_utf8_lossy(&response);
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(Error::Ws(crate::error::WsError::MalformedFrame));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::GateAgent;
    use compio::net::TcpListener;
    use skeleton_core::message::{Endianness, JsonCodec, Processor};

    fn noop_factory(processor: Arc<Processor<Arc<GateAgent>>>, pool: WorkerPool) -> AgentFactory {
        Arc::new(move |connection| {
            let agent = GateAgent::new(connection, processor.clone(), pool.clone());
            agent.bind_self_handle();
            agent as Arc<dyn Agent>
        })
    }

    #[compio::test]
    async fn dialer_connects_and_close_tears_down_the_session() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let pool = WorkerPool::unbounded();
        let processor: Arc<Processor<Arc<GateAgent>>> = Arc::new(Processor::new(Arc::new(JsonCodec), Endianness::Big));

        let dialer = Arc::new(TcpDialer::new(
            crate::config::TcpClientOptions::new(format!("127.0.0.1:{port}")),
            pool.clone(),
            noop_factory(processor, pool.clone()),
            None,
        ));
        dialer.run().await.unwrap();

        let (_server_stream, _addr) = listener.accept().await.unwrap();

        for _ in 0..200 {
            if dialer.active_sessions() > 0 {
                break;
            }
            compio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(dialer.active_sessions(), 1);

        dialer.close().await;
        assert!(dialer.is_closed());
        assert_eq!(dialer.active_sessions(), 0);
    }
}
