//! Minimal cross-process fabric: "open outbound and inbound TCP pipes," and
//! nothing else. A cluster agent is a plain [`Connection`] with empty
//! lifecycle hooks — it carries no protocol of its own. A concrete
//! deployment layers its own cross-process protocol on top by registering
//! its own [`crate::agent::AgentFactory`] here instead of the inert default,
//! if it wants one; the runtime core intentionally prescribes nothing.
//!
//! Unlike [`crate::gate::Gate`], `Cluster` is not registered with the
//! [`skeleton_core::module::Orchestrator`] as a [`skeleton_core::module::Module`] —
//! it implements [`skeleton_core::module::ClusterHandle`] instead, since the
//! orchestrator starts the cluster fabric before any module's `Run` and
//! stops it before any module's `Destroy`, a distinct position in the
//! startup/shutdown ordering.

use crate::acceptor::TcpAcceptor;
use crate::agent::{Agent, AgentFactory};
use crate::config::TcpClientOptions;
use crate::connection::Connection;
use crate::dialer::TcpDialer;
use crate::tls::TlsConfigLoader;
use async_trait::async_trait;
use skeleton_core::module::ClusterHandle;
use skeleton_core::worker::WorkerPool;
use std::sync::Arc;

/// A cluster agent that does nothing: no read loop, no framing, no
/// dispatch. Its only purpose is to keep the underlying socket open and
/// registered so the orchestrator can tear it down on shutdown.
struct InertAgent {
    connection: Arc<dyn Connection>,
}

#[async_trait]
impl Agent for InertAgent {
    async fn on_connect(&self) {}

    async fn run(&self) {
        // Block until the peer (or our own shutdown) closes the socket;
        // an inert agent still has to hold the session task open, since
        // the acceptor/dialer tears the connection down only when this
        // returns.
        loop {
            if self.connection.read_msg().await.is_err() {
                break;
            }
        }
    }

    async fn on_close(&self) {
        self.connection.do_destroy();
    }

    fn connection(&self) -> &(dyn Connection + '_) {
        &*self.connection
    }
}

#[must_use]
pub fn inert_agent_factory() -> AgentFactory {
    Arc::new(|connection| Arc::new(InertAgent { connection }) as Arc<dyn Agent>)
}

/// Composes an optional cluster-listen acceptor with one dialer per peer
/// address, all sharing the inert agent above.
pub struct Cluster {
    pool: WorkerPool,
    acceptor: Option<Arc<TcpAcceptor>>,
    dialers: Vec<TcpDialer>,
}

impl Cluster {
    #[must_use]
    pub fn new(
        pool: WorkerPool,
        listen_options: Option<crate::config::TcpServerOptions>,
        peer_addrs: Vec<String>,
        tls_loader: Option<Arc<dyn TlsConfigLoader>>,
    ) -> Self {
        let factory = inert_agent_factory();
        let acceptor = listen_options.map(|o| Arc::new(TcpAcceptor::new(o, pool.clone(), factory.clone(), tls_loader.clone())));
        let dialers = peer_addrs
            .into_iter()
            .map(|addr| TcpDialer::new(TcpClientOptions::new(addr), pool.clone(), factory.clone(), tls_loader.clone()))
            .collect();
        Self { pool, acceptor, dialers }
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.dialers.iter().map(TcpDialer::active_sessions).sum()
    }

    #[must_use]
    pub fn inbound_count(&self) -> usize {
        self.acceptor.as_ref().map_or(0, |a| a.conn_count())
    }
}

#[async_trait]
impl ClusterHandle for Cluster {
    async fn start(&self) -> skeleton_core::error::Result<()> {
        for dialer in &self.dialers {
            if let Err(err) = dialer.run().await {
                tracing::error!(error = %err, "cluster dialer failed to start");
            }
        }

        if let Some(acceptor) = self.acceptor.clone() {
            self.pool.submit_future(async move {
                if let Err(err) = acceptor.run().await {
                    tracing::error!(error = %err, "cluster acceptor exited");
                }
            });
        }

        Ok(())
    }

    async fn stop(&self) {
        if let Some(acceptor) = &self.acceptor {
            acceptor.close().await;
        }
        for dialer in &self.dialers {
            dialer.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compio::net::TcpListener;

    #[compio::test]
    async fn cluster_dials_a_peer_and_tracks_it_as_active() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let pool = WorkerPool::unbounded();

        let cluster = Cluster::new(pool.clone(), None, vec![format!("127.0.0.1:{port}")], None);
        cluster.start().await.unwrap();

        let (_server_stream, _) = listener.accept().await.unwrap();

        for _ in 0..200 {
            if cluster.peer_count() == 1 {
                break;
            }
            compio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(cluster.peer_count(), 1);

        cluster.stop().await;
    }

    #[compio::test]
    async fn cluster_acceptor_accepts_inbound_connections() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let pool = WorkerPool::unbounded();
        let cluster = Cluster::new(
            pool.clone(),
            Some(crate::config::TcpServerOptions::new(format!("127.0.0.1:{port}"))),
            Vec::new(),
            None,
        );
        cluster.start().await.unwrap();
        compio::time::sleep(std::time::Duration::from_millis(20)).await;

        let _client = compio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        for _ in 0..200 {
            if cluster.inbound_count() == 1 {
                break;
            }
            compio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(cluster.inbound_count(), 1);

        cluster.stop().await;
    }
}
