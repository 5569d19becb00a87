//! The central event loop: one long-running task per module, multiplexing
//! its four ingress classes and processing each event to completion before
//! selecting again. Everything that reaches a module's handler code runs
//! here, and only here — that serialization is what lets handlers touch
//! module state without locks.

use crate::chanrpc::{Client, Server};
use crate::go_helper::GoHelper;
use crate::status::AtomicStatus;
use crate::timer::Dispatcher;
use crate::worker::WorkerPool;
use futures::FutureExt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Per-module aggregate: a [`Server`] (ingress from other modules), a
/// [`Client`] (egress), a [`GoHelper`] (worker-pool fan-out), a
/// [`Dispatcher`] (timers), and a status. Destroying the skeleton destroys
/// all four.
pub struct Skeleton<K> {
    server: Server<K>,
    client: Client<K>,
    go_helper: GoHelper,
    dispatcher: Arc<Dispatcher>,
    status: AtomicStatus,
}

impl<K> Skeleton<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(call_queue_cap: usize, async_cap: usize, pool: WorkerPool) -> Self {
        let server = Server::new(call_queue_cap);
        let mut client = Client::new(async_cap);
        client.attach_server(server.clone());
        Self {
            server,
            client,
            go_helper: GoHelper::new(pool),
            dispatcher: Arc::new(Dispatcher::new()),
            status: AtomicStatus::new(),
        }
    }

    #[must_use]
    pub fn server(&self) -> &Server<K> {
        &self.server
    }

    #[must_use]
    pub fn client(&self) -> &Client<K> {
        &self.client
    }

    #[must_use]
    pub fn go_helper(&self) -> &GoHelper {
        &self.go_helper
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Run the loop until `shutdown` fires, then tear down in the order the
    /// design requires: close the dispatcher, close the server (draining
    /// pending calls with `ServerClosed`), then repeatedly close the
    /// go-helper and the client until both report idle. This ordering
    /// guarantees no new work enters while outstanding work drains.
    pub async fn run(&self, shutdown: flume::Receiver<()>) {
        self.status.start();

        let dispatcher = self.dispatcher.clone();
        let timer_driver = compio::runtime::spawn(async move { dispatcher.run().await });

        let call_chan = self.server.chan();
        let async_chan = self.client.async_chan();
        let go_chan = self.go_helper.chan();
        let timer_chan = self.dispatcher.chan();

        loop {
            futures::select! {
                s = shutdown.recv_async().fuse() => {
                    let _ = s;
                    break;
                }
                env = async_chan.recv_async().fuse() => {
                    if let Ok(env) = env {
                        self.client.cb(env);
                    }
                }
                ci = call_chan.recv_async().fuse() => {
                    if let Ok(ci) = ci {
                        self.server.exec(ci);
                    }
                }
                job = go_chan.recv_async().fuse() => {
                    if let Ok(job) = job {
                        self.go_helper.cb(job);
                    }
                }
                job = timer_chan.recv_async().fuse() => {
                    if let Ok(job) = job {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("timer job panicked in skeleton loop");
                        }
                    }
                }
            }
        }

        self.dispatcher.close();
        self.server.close();
        loop {
            self.go_helper.close().await;
            self.client.close().await;
            if self.go_helper.is_idle() && self.client.is_idle() {
                break;
            }
        }
        self.status.close_from_any();
        timer_driver.detach();
    }
}
