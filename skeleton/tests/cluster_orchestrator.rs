//! An `Orchestrator` configured with `OrchestratorOptions::with_cluster`
//! brings the cluster fabric up before any module's `Run` starts, and tears
//! it down in `shutdown` before any module's `Destroy` runs.

use skeleton::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct OrderRecordingModule {
    cluster_up_at_run: Arc<Mutex<Option<bool>>>,
    cluster: Arc<Cluster>,
}

#[async_trait::async_trait]
impl Module for OrderRecordingModule {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, ready: ReadyNotifier) {
        *self.cluster_up_at_run.lock().unwrap() = Some(self.cluster.peer_count() == 1);
        ready.notify();
    }

    async fn destroy(&self) {}
}

#[compio::test]
async fn cluster_fabric_starts_before_any_module_run_and_stops_in_shutdown() {
    let peer_port = portpicker::pick_unused_port().expect("no free port");
    let peer_listener = compio::net::TcpListener::bind(("127.0.0.1", peer_port)).await.unwrap();

    let pool = WorkerPool::unbounded();
    let cluster = Arc::new(Cluster::new(pool.clone(), None, vec![format!("127.0.0.1:{peer_port}")], None));

    let cluster_up_at_run = Arc::new(Mutex::new(None));
    let module = Arc::new(OrderRecordingModule {
        cluster_up_at_run: cluster_up_at_run.clone(),
        cluster: cluster.clone(),
    });

    let accepted = Arc::new(AtomicBool::new(false));
    let accepted_for_task = accepted.clone();
    compio::runtime::spawn(async move {
        if peer_listener.accept().await.is_ok() {
            accepted_for_task.store(true, Ordering::SeqCst);
        }
    })
    .detach();

    // Give the dialer a head start so the peer connection is plausibly up
    // by the time the module's `run` checks `peer_count`.
    compio::time::sleep(Duration::from_millis(20)).await;

    let options = OrchestratorOptions::new().with_cluster(cluster.clone() as Arc<dyn ClusterHandle>);
    let mut orchestrator = Orchestrator::new(pool, Arc::new(MonotonicId::new())).with_options(options);
    orchestrator.register(module);
    orchestrator.start().await.expect("orchestrator failed to start");

    for _ in 0..200 {
        if accepted.load(Ordering::SeqCst) {
            break;
        }
        compio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(accepted.load(Ordering::SeqCst));
    assert_eq!(*cluster_up_at_run.lock().unwrap(), Some(true));

    orchestrator.shutdown().await;
    assert_eq!(cluster.peer_count(), 0);
}
