//! End-to-end: a `Gate` registered with the `Orchestrator` accepts a TCP
//! connection, unmarshals a frame, and a direct handler replies through the
//! agent it's handed.

use serde::{Deserialize, Serialize};
use skeleton::prelude::*;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Echo {
    payload: String,
}

#[compio::test]
async fn orchestrator_runs_a_gate_that_echoes_a_frame() {
    let port = portpicker::pick_unused_port().expect("no free port");
    let pool = WorkerPool::unbounded();
    let processor: Arc<Processor<Arc<GateAgent>>> = Arc::new(Processor::new(Arc::new(JsonCodec), Endianness::Big));

    let replied = Arc::new(AtomicBool::new(false));
    let replied_in_handler = replied.clone();
    processor
        .register::<Echo>(
            1,
            None,
            Some(Arc::new(move |value, agent: Arc<GateAgent>| {
                let echo = value.downcast_ref::<Echo>().unwrap().clone();
                let replied = replied_in_handler.clone();
                compio::runtime::spawn(async move {
                    agent.send(&echo).await.unwrap();
                    replied.store(true, Ordering::SeqCst);
                })
                .detach();
            })),
        )
        .unwrap();

    let gate = Arc::new(Gate::new(
        processor.clone(),
        pool.clone(),
        Arc::new(NoopAgentHook),
        Some(TcpServerOptions::new(format!("127.0.0.1:{port}"))),
        None,
        None,
    ));

    let mut orchestrator = Orchestrator::new(pool.clone(), Arc::new(MonotonicId::new()));
    orchestrator.register(gate.clone());
    orchestrator.start().await.expect("orchestrator failed to start");

    let client_stream = compio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let client = TcpConnection::new(client_stream, FrameOptions::default(), 8, &pool).unwrap();

    let echo = Echo { payload: "ping".into() };
    let body = processor.marshal(&echo as &(dyn Any + Send)).unwrap();
    client.write_msg(&[&body]).await.unwrap();

    let frame = client.read_msg().await.expect("no reply received");
    let (value, _type_id) = processor.unmarshal(&frame).unwrap();
    let reply = value.downcast_ref::<Echo>().unwrap();
    assert_eq!(reply.payload, "ping");

    for _ in 0..100 {
        if replied.load(Ordering::SeqCst) {
            break;
        }
        compio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(replied.load(Ordering::SeqCst));

    client.do_destroy();
    orchestrator.shutdown().await;
}
