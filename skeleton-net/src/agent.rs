//! The per-connection read loop: owns a [`Connection`], an opaque user-data
//! slot, and drives frames through a shared [`Processor`] until the
//! connection closes.

use crate::connection::Connection;
use crate::error::Result;
use async_trait::async_trait;
use skeleton_core::message::Processor;
use skeleton_core::worker::WorkerPool;
use std::any::Any;
use std::sync::{Arc, RwLock};

/// Lifecycle hooks an [`Acceptor`](crate::acceptor::Acceptor)/
/// [`Dialer`](crate::dialer::Dialer) drives around a session: `on_connect`
/// fires once before the read loop starts, `on_close` fires exactly once
/// after the loop exits and the connection is closed.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn on_connect(&self);

    /// Run the read loop until the connection closes or errors.
    async fn run(&self);

    async fn on_close(&self);

    #[must_use]
    fn connection(&self) -> &(dyn Connection + '_);
}

/// Constructs an [`Agent`] for a freshly accepted/dialed [`Connection`].
/// Injected into [`crate::acceptor::Acceptor`]/[`crate::dialer::Dialer`] so
/// the connection pipeline stays independent of application message types.
pub type AgentFactory = Arc<dyn Fn(Arc<dyn Connection>) -> Arc<dyn Agent> + Send + Sync>;

/// Reference implementation of [`Agent`]: unmarshals each frame through a
/// shared [`Processor`] and routes it, exactly as the Gate uses it.
///
/// The processor's routing user-data is `Arc<GateAgent>` itself, so a
/// direct-dispatch handler can call back into `agent.write_msg` /
/// `agent.user_data` without a second lookup.
pub struct GateAgent {
    connection: Arc<dyn Connection>,
    processor: Arc<Processor<Arc<GateAgent>>>,
    pool: WorkerPool,
    user_data: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl GateAgent {
    #[must_use]
    pub fn new(connection: Arc<dyn Connection>, processor: Arc<Processor<Arc<GateAgent>>>, pool: WorkerPool) -> Arc<Self> {
        Arc::new(Self {
            connection,
            processor,
            pool,
            user_data: RwLock::new(None),
        })
    }

    /// Marshal and write `value` (by its registered runtime type) to the
    /// peer. This is the `agent.WriteMsg` handlers call after `Route`.
    ///
    /// # Errors
    /// Propagates marshal failures or a closed connection.
    pub async fn send<T>(&self, value: &T) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        let body = self.processor.marshal(value as &(dyn Any + Send))?;
        self.connection.write_msg(&[&body]).await
    }

    /// Store an opaque, atomically-swappable piece of application state
    /// alongside this agent (e.g. the authenticated player id).
    pub fn set_user_data(&self, value: Arc<dyn Any + Send + Sync>) {
        *self.user_data.write().expect("user-data lock poisoned") = Some(value);
    }

    #[must_use]
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.user_data.read().expect("user-data lock poisoned").clone()
    }
}

#[async_trait]
impl Agent for GateAgent {
    async fn on_connect(&self) {
        tracing::debug!("agent connected");
    }

    async fn run(&self) {
        loop {
            let frame = match self.connection.read_msg().await {
                Ok(frame) => frame,
                Err(_) => break,
            };

            let (value, type_id) = match self.processor.unmarshal(&frame) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(%err, "failed to unmarshal frame, closing connection");
                    break;
                }
            };

            // `self` outlives every task this spawns onto the pool: the
            // acceptor/dialer session task holds an `Arc<Self>` (via the
            // shared `user_data` passed into `route`) for as long as the
            // read loop runs, and route's spawned handlers complete
            // independently of it.
            let pool = self.pool.clone();
            let user_data = match self.user_data_handle() {
                Some(handle) => handle,
                None => {
                    tracing::warn!("agent has no self-handle registered, dropping frame");
                    continue;
                }
            };
            let route_result = self.processor.route(type_id, value, user_data, &|f| {
                pool.submit(f);
            });
            if let Err(err) = route_result {
                tracing::warn!(%err, "failed to route frame");
            }
        }
    }

    async fn on_close(&self) {
        self.connection.do_destroy();
        tracing::debug!("agent disconnected");
    }

    fn connection(&self) -> &(dyn Connection + '_) {
        &*self.connection
    }
}

impl GateAgent {
    /// The processor's routing user-data is `Arc<GateAgent>`, which only
    /// the object that constructed this agent (the acceptor/dialer session)
    /// can hand out — `run` itself has no `Arc<Self>`. Callers wire this up
    /// by registering a self-referential handle at construction time
    /// through [`GateAgent::bind_self_handle`].
    fn user_data_handle(&self) -> Option<Arc<GateAgent>> {
        self.user_data
            .read()
            .expect("user-data lock poisoned")
            .as_ref()
            .and_then(|v| v.clone().downcast::<GateAgent>().ok())
    }

    /// Register `self` as its own processor user-data handle. Called once,
    /// immediately after construction, by whoever holds the `Arc<GateAgent>`
    /// (the acceptor/dialer session task).
    pub fn bind_self_handle(self: &Arc<Self>) {
        self.set_user_data(self.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TcpConnection;
    use crate::config::FrameOptions;
    use compio::net::{TcpListener, TcpStream};
    use serde::{Deserialize, Serialize};
    use skeleton_core::message::{Endianness, JsonCodec};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        nonce: u32,
    }

    #[compio::test]
    async fn run_unmarshals_and_routes_a_registered_frame() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let client_stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let pool = WorkerPool::unbounded();
        let client = Arc::new(TcpConnection::new(client_stream, FrameOptions::default(), 8, &pool).unwrap());
        let server_conn: Arc<dyn Connection> =
            Arc::new(TcpConnection::new(server_stream, FrameOptions::default(), 8, &pool).unwrap());

        let handled = Arc::new(AtomicBool::new(false));
        let handled2 = handled.clone();

        let processor: Arc<Processor<Arc<GateAgent>>> =
            Arc::new(Processor::new(Arc::new(JsonCodec), Endianness::Big));
        processor
            .register::<Ping>(
                1,
                None,
                Some(Arc::new(move |value, _agent: Arc<GateAgent>| {
                    let ping = value.downcast_ref::<Ping>().unwrap();
                    assert_eq!(ping.nonce, 7);
                    handled2.store(true, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let agent = GateAgent::new(server_conn, processor.clone(), pool.clone());
        agent.bind_self_handle();

        let ping = Ping { nonce: 7 };
        let body = processor.marshal(&ping as &(dyn Any + Send)).unwrap();
        client.write_msg(&[&body]).await.unwrap();
        client.do_destroy();

        agent.run().await;

        for _ in 0..100 {
            if handled.load(Ordering::SeqCst) {
                break;
            }
            compio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(handled.load(Ordering::SeqCst));
    }
}
