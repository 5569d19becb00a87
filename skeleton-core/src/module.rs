//! Module lifecycle and the orchestrator that drives it.
//!
//! A module exposes `{Init, Run, Destroy}`. `Init` runs synchronously, in
//! user-registration order, before anything else — this is where RPC
//! registrations and message routes are set. `Run` is submitted to the
//! worker pool; rather than the original's fixed-backoff poll of a
//! `Running` flag, a module signals readiness itself by calling
//! [`ReadyNotifier::notify`] once from inside `run`, and the orchestrator
//! awaits that one-shot notification before moving on to the next module.
//! `Destroy` runs in **reverse** registration order on shutdown.

use crate::error::Result;
use crate::id::SnowflakeId;
use crate::profile::ProfileHook;
use crate::worker::WorkerPool;
use async_trait::async_trait;
use std::sync::Arc;

/// One-shot readiness signal a module fires from inside [`Module::run`].
pub struct ReadyNotifier(flume::Sender<()>);

impl ReadyNotifier {
    /// Signal that the module is plausibly up. Safe to call at most once;
    /// later calls are silently ignored (the receiving slot has capacity 1
    /// and the orchestrator only ever awaits the first).
    pub fn notify(&self) {
        let _ = self.0.try_send(());
    }
}

impl From<flume::Sender<()>> for ReadyNotifier {
    /// Lets a caller driving a [`Module`] outside the [`Orchestrator`]
    /// (e.g. a test) build its own readiness channel.
    fn from(tx: flume::Sender<()>) -> Self {
        Self(tx)
    }
}

/// Starts and stops the cluster fabric — the orchestrator's step 3 and the
/// first action of its shutdown step, distinct from the generic
/// per-[`Module`] `Run`/`Destroy` loop since cluster must be up before any
/// module's `Run` starts and down before any module's `Destroy` runs.
/// Implemented by `skeleton_net::cluster::Cluster`; kept as a trait here so
/// `skeleton-core` never depends on `skeleton-net`.
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Start listening/dialing. Returns once the cluster is plausibly up,
    /// not once every peer connection has completed.
    async fn start(&self) -> Result<()>;
    /// Idempotent teardown of every inbound/outbound cluster connection.
    async fn stop(&self);
}

/// Orchestrator-level configuration: the cluster fabric and profiling mux,
/// both external-collaborator seams the orchestrator merely wires up.
#[derive(Clone, Default)]
pub struct OrchestratorOptions {
    cluster: Option<Arc<dyn ClusterHandle>>,
    profile_addr: Option<String>,
    profile_hook: Option<Arc<dyn ProfileHook>>,
}

impl OrchestratorOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterHandle>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, addr: impl Into<String>, hook: Arc<dyn ProfileHook>) -> Self {
        self.profile_addr = Some(addr.into());
        self.profile_hook = Some(hook);
        self
    }
}

#[async_trait]
pub trait Module: Send + Sync {
    /// Register RPC functions and message routes. Called synchronously, in
    /// registration order, before any module's `run`.
    fn init(&self) -> Result<()>;

    /// The module's long-running task, submitted to the worker pool. Must
    /// call `ready.notify()` once it is plausibly accepting work, then run
    /// until `destroy` closes it down.
    async fn run(&self, ready: ReadyNotifier);

    /// Tear the module down. Idempotent; called once, in reverse
    /// registration order, after a shutdown signal.
    async fn destroy(&self);
}

/// Drives module lifecycle: `Init` in order, `Run` with readiness
/// notification, block for a shutdown signal, `Destroy` in reverse order.
pub struct Orchestrator {
    modules: Vec<Arc<dyn Module>>,
    pool: WorkerPool,
    id_gen: Arc<dyn SnowflakeId>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    #[must_use]
    pub fn new(pool: WorkerPool, id_gen: Arc<dyn SnowflakeId>) -> Self {
        Self {
            modules: Vec::new(),
            pool,
            id_gen,
            options: OrchestratorOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a module. Order matters: `Init`/`Run` happen in
    /// registration order, `Destroy` in the reverse.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.push(module);
    }

    /// Initialize the id generator, `Init` every module in order, start the
    /// cluster fabric if configured, `Run` every module waiting for its
    /// readiness notification, serve the profiling mux if configured, then
    /// return — the caller decides what "wait for shutdown" means (tests
    /// may skip it entirely;
    /// [`crate::signal::wait_for_shutdown_signal`] is the production
    /// answer).
    ///
    /// # Errors
    /// Returns the first error the cluster fabric or any module's `Init`
    /// produces; no `Run` has been submitted yet at that point.
    pub async fn start(&self) -> Result<u64> {
        let serve_id = self.id_gen.next_id();

        for module in &self.modules {
            module.init()?;
        }

        if let Some(cluster) = &self.options.cluster {
            cluster.start().await?;
        }

        for module in &self.modules {
            let (ready_tx, ready_rx) = flume::bounded(1);
            let notifier = ReadyNotifier(ready_tx);
            let module = module.clone();
            self.pool.submit_future(async move {
                module.run(notifier).await;
            });
            let _ = ready_rx.recv_async().await;
        }

        if let (Some(addr), Some(hook)) = (&self.options.profile_addr, &self.options.profile_hook) {
            if let Err(err) = hook.serve(addr).await {
                tracing::error!(error = %err, addr, "profiling mux failed to start");
            }
        }

        Ok(serve_id)
    }

    /// Stop the cluster fabric, then destroy every module in reverse
    /// registration order. Call after a shutdown signal.
    pub async fn shutdown(&self) {
        if let Some(cluster) = &self.options.cluster {
            cluster.stop().await;
        }
        for module in self.modules.iter().rev() {
            module.destroy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::MonotonicId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingModule {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        run_count: AtomicUsize,
    }

    #[async_trait]
    impl Module for RecordingModule {
        fn init(&self) -> Result<()> {
            self.order.lock().unwrap().push(self.name);
            Ok(())
        }

        async fn run(&self, ready: ReadyNotifier) {
            self.run_count.fetch_add(1, Ordering::SeqCst);
            ready.notify();
        }

        async fn destroy(&self) {
            self.order.lock().unwrap().push(self.name);
        }
    }

    #[compio::test]
    async fn init_runs_in_order_destroy_runs_in_reverse() {
        let init_order = Arc::new(Mutex::new(Vec::new()));
        let destroy_order = Arc::new(Mutex::new(Vec::new()));

        let mut orchestrator = Orchestrator::new(WorkerPool::unbounded(), Arc::new(MonotonicId::new()));
        orchestrator.register(Arc::new(RecordingModule {
            name: "a",
            order: init_order.clone(),
            run_count: AtomicUsize::new(0),
        }));
        orchestrator.register(Arc::new(RecordingModule {
            name: "b",
            order: init_order.clone(),
            run_count: AtomicUsize::new(0),
        }));

        orchestrator.start().await.unwrap();
        assert_eq!(*init_order.lock().unwrap(), vec!["a", "b"]);

        // reuse the same recorder for destroy order on a second pair so we
        // observe strict reversal independent of init ordering above
        let mut orchestrator = Orchestrator::new(WorkerPool::unbounded(), Arc::new(MonotonicId::new()));
        orchestrator.register(Arc::new(RecordingModule {
            name: "a",
            order: destroy_order.clone(),
            run_count: AtomicUsize::new(0),
        }));
        orchestrator.register(Arc::new(RecordingModule {
            name: "b",
            order: destroy_order.clone(),
            run_count: AtomicUsize::new(0),
        }));
        orchestrator.start().await.unwrap();
        orchestrator.shutdown().await;
        assert_eq!(*destroy_order.lock().unwrap(), vec!["b", "a"]);
    }
}
