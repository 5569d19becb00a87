use super::server::{CallInfo, Server};
use super::{Args, ChanRpcError, Envelope, Reply};
use std::any::Any;
use std::cell::Cell;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// The three callback shapes `async_call0`/`async_call1`/`async_call_n`
/// accept, kept as distinct operations so a caller cannot hand a `call1`
/// callback to an `async_call0` site and vice versa.
pub enum Callback {
    /// `(err)`.
    Zero(Box<dyn FnOnce(Option<ChanRpcError>) + Send>),
    /// `(value, err)`.
    One(Box<dyn FnOnce(Option<Box<dyn Any + Send>>, Option<ChanRpcError>) + Send>),
    /// `(values, err)`.
    Many(Box<dyn FnOnce(Vec<Box<dyn Any + Send>>, Option<ChanRpcError>) + Send>),
}

impl Callback {
    fn run(self, result: super::CallResult) {
        let outcome = catch_unwind(AssertUnwindSafe(move || match (self, result) {
            (Callback::Zero(cb), Ok(_)) => cb(None),
            (Callback::Zero(cb), Err(e)) => cb(Some(e)),
            (Callback::One(cb), Ok(Reply::One(v))) => cb(Some(v), None),
            (Callback::One(cb), Ok(_)) => cb(None, None),
            (Callback::One(cb), Err(e)) => cb(None, Some(e)),
            (Callback::Many(cb), Ok(Reply::Many(vs))) => cb(vs, None),
            (Callback::Many(cb), Ok(_)) => cb(Vec::new(), None),
            (Callback::Many(cb), Err(e)) => cb(Vec::new(), Some(e)),
        }));
        if outcome.is_err() {
            tracing::error!("chanrpc async callback panicked");
        }
    }

    fn run_error(self, err: ChanRpcError) {
        self.run(Err(err));
    }
}

/// A caller's handle onto a [`Server`]: one sync reply slot, one bounded
/// async reply queue, and a `pendingAsync` counter.
///
/// Not `Sync` by construction (the counter is a bare `Cell`): the design
/// note in the spec resolves the async-cap race by documenting the client
/// as single-owner rather than serializing it with a lock. All calls — sync
/// and async — are expected to originate from the one task that owns this
/// client (typically a skeleton loop).
pub struct Client<K> {
    server: Option<Server<K>>,
    sync_tx: flume::Sender<Envelope>,
    sync_rx: flume::Receiver<Envelope>,
    async_tx: flume::Sender<Envelope>,
    async_rx: flume::Receiver<Envelope>,
    async_cap: usize,
    pending_async: Cell<usize>,
}

impl<K> Client<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a detached client whose async reply queue holds up to
    /// `async_cap` outstanding calls.
    #[must_use]
    pub fn new(async_cap: usize) -> Self {
        let (sync_tx, sync_rx) = flume::bounded(1);
        let (async_tx, async_rx) = flume::bounded(async_cap.max(1));
        Self {
            server: None,
            sync_tx,
            sync_rx,
            async_tx,
            async_rx,
            async_cap,
            pending_async: Cell::new(0),
        }
    }

    /// Attach (or replace) the server this client calls into.
    pub fn attach_server(&mut self, server: Server<K>) {
        self.server = Some(server);
    }

    /// Outstanding async calls that haven't had their callback run yet.
    #[must_use]
    pub fn pending_async(&self) -> usize {
        self.pending_async.get()
    }

    /// `true` once every outstanding async reply has been serviced.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_async.get() == 0
    }

    fn sync_call(&self, id: K, args: Args) -> super::CallResult {
        let Some(server) = &self.server else {
            return Err(ChanRpcError::ServerNotAttached);
        };
        let ci = CallInfo {
            id,
            args,
            reply_tx: Some(self.sync_tx.clone()),
            cb: None,
        };
        if let Err((e, _ci)) = server.call(ci, true) {
            return Err(e);
        }
        self.sync_rx
            .recv()
            .map(|env| env.result)
            .unwrap_or(Err(ChanRpcError::ServerClosed))
    }

    /// Blocking zero-result call.
    pub fn call0(&self, id: K, args: Args) -> Result<(), ChanRpcError> {
        self.sync_call(id, args).map(|_| ())
    }

    /// Blocking single-result call.
    pub fn call1(&self, id: K, args: Args) -> Result<Box<dyn Any + Send>, ChanRpcError> {
        match self.sync_call(id, args)? {
            Reply::One(v) => Ok(v),
            _ => Err(ChanRpcError::NotRegistered),
        }
    }

    /// Blocking multi-result call.
    pub fn call_n(&self, id: K, args: Args) -> Result<Vec<Box<dyn Any + Send>>, ChanRpcError> {
        match self.sync_call(id, args)? {
            Reply::Many(vs) => Ok(vs),
            _ => Err(ChanRpcError::NotRegistered),
        }
    }

    /// Non-blocking call whose reply arrives later via `cb`, delivered on a
    /// future call to [`Client::poll_async`] (normally driven by the owning
    /// skeleton loop).
    ///
    /// If `pendingAsync >= cap(asyncChan)` at the moment of the call, `cb`
    /// is invoked synchronously, right here, with `TooManyCalls` — nothing
    /// is enqueued.
    pub fn async_call(&self, id: K, args: Args, cb: Callback) {
        if self.pending_async.get() >= self.async_cap {
            cb.run_error(ChanRpcError::TooManyCalls);
            return;
        }

        self.pending_async.set(self.pending_async.get() + 1);

        // Server absent or already closed: synthesize the failure directly
        // onto our own async channel so `cb` still runs (via `Cb`) and the
        // pending counter still balances, without ever touching the queue.
        match &self.server {
            Some(server) if !server.is_closed() => {
                let ci = CallInfo {
                    id,
                    args,
                    reply_tx: Some(self.async_tx.clone()),
                    cb: Some(Box::new(cb)),
                };
                // Non-blocking enqueue: a full target queue must not stall
                // the task driving this client (typically a skeleton loop).
                // On failure `call` hands the `CallInfo` back so its `cb`
                // isn't lost; deliver the error the same way the
                // detached/closed branch below does.
                if let Err((err, ci)) = server.call(ci, false) {
                    let _ = self.async_tx.send(Envelope {
                        result: Err(err),
                        cb: ci.cb,
                    });
                }
            }
            _ => {
                let _ = self.async_tx.send(Envelope {
                    result: Err(ChanRpcError::ServerNotAttached),
                    cb: Some(Box::new(cb)),
                });
            }
        }
    }

    /// Drain exactly one completed async reply, running its callback and
    /// decrementing the pending counter. Called by the owning skeleton
    /// loop whenever `async_chan()` is ready.
    pub fn cb(&self, envelope: Envelope) {
        self.pending_async.set(self.pending_async.get().saturating_sub(1));
        let Envelope { result, cb } = envelope;
        let Some(cb) = cb else { return };
        let cb = *cb
            .downcast::<Callback>()
            .expect("async reply callback must round-trip as Callback");
        cb.run(result);
    }

    /// The receive end of the async reply queue, selected on by the owning
    /// skeleton's loop.
    #[must_use]
    pub fn async_chan(&self) -> flume::Receiver<Envelope> {
        self.async_rx.clone()
    }

    /// Drain all outstanding async replies. Async so waiting never parks
    /// the compio executor thread the rest of the skeleton loop runs on.
    pub async fn close(&self) {
        while !self.is_idle() {
            match self.async_rx.recv_async().await {
                Ok(env) => self.cb(env),
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chanrpc::Server;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn call0_roundtrip_success() {
        let server: Server<&'static str> = Server::new(8);
        server.register0("ping", |_| {}).unwrap();
        let mut client: Client<&'static str> = Client::new(4);
        client.attach_server(server.clone());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let ci = server.chan().recv().unwrap();
                server.exec(ci);
            });
            client.call0("ping", Box::new(())).unwrap();
        });
    }

    #[test]
    fn call1_on_unregistered_id_errors() {
        let server: Server<&'static str> = Server::new(8);
        let mut client: Client<&'static str> = Client::new(4);
        client.attach_server(server.clone());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let ci = server.chan().recv().unwrap();
                server.exec(ci);
            });
            let err = client.call1("missing", Box::new(())).unwrap_err();
            assert_eq!(err, ChanRpcError::NotRegistered);
        });
    }

    #[test]
    fn call_with_no_server_attached_fails_fast() {
        let client: Client<&'static str> = Client::new(4);
        let err = client.call0("ping", Box::new(())).unwrap_err();
        assert_eq!(err, ChanRpcError::ServerNotAttached);
    }

    #[test]
    fn async_call_over_cap_runs_callback_synchronously_without_enqueue() {
        let client: Client<&'static str> = Client::new(1);
        client.pending_async.set(1);
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        client.async_call(
            "x",
            Box::new(()),
            Callback::Zero(Box::new(move |err| {
                fired2.store(true, Ordering::SeqCst);
                assert_eq!(err, Some(ChanRpcError::TooManyCalls));
            })),
        );
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(client.pending_async(), 1, "over-cap call must not enqueue");
    }

    #[test]
    fn async_call_with_no_server_eventually_fires_error_and_drains() {
        let client: Client<&'static str> = Client::new(4);
        let result = Arc::new(AtomicI32::new(-1));
        let result2 = result.clone();
        client.async_call(
            "x",
            Box::new(()),
            Callback::Zero(Box::new(move |err| {
                result2.store(if err.is_some() { 1 } else { 0 }, Ordering::SeqCst);
            })),
        );
        assert_eq!(client.pending_async(), 1);

        let env = client.async_chan().recv().unwrap();
        client.cb(env);
        assert_eq!(result.load(Ordering::SeqCst), 1);
        assert_eq!(client.pending_async(), 0);
    }

    #[test]
    fn async_call_success_path_runs_callback_with_value() {
        let server: Server<&'static str> = Server::new(8);
        server.register1("double", |args| {
            let n = *args.downcast::<i32>().unwrap();
            Box::new(n * 2) as Box<dyn Any + Send>
        }).unwrap();
        let mut client: Client<&'static str> = Client::new(4);
        client.attach_server(server.clone());

        let got = Arc::new(AtomicI32::new(0));
        let got2 = got.clone();
        client.async_call(
            "double",
            Box::new(21i32),
            Callback::One(Box::new(move |v, err| {
                assert!(err.is_none());
                got2.store(*v.unwrap().downcast::<i32>().unwrap(), Ordering::SeqCst);
            })),
        );

        let ci = server.chan().recv().unwrap();
        server.exec(ci);
        let env = client.async_chan().recv().unwrap();
        client.cb(env);
        assert_eq!(got.load(Ordering::SeqCst), 42);
        assert_eq!(client.pending_async(), 0);
    }

    #[test]
    fn async_call_against_full_target_queue_delivers_error_without_blocking() {
        let server: Server<&'static str> = Server::new(1);
        server.register0("noop", |_| {}).unwrap();
        server.go("noop", Box::new(())); // fills the bounded(1) queue, left undrained

        let mut client: Client<&'static str> = Client::new(4);
        client.attach_server(server.clone());

        let result = Arc::new(AtomicI32::new(-1));
        let result2 = result.clone();
        client.async_call(
            "noop",
            Box::new(()),
            Callback::Zero(Box::new(move |err| {
                result2.store(if err == Some(ChanRpcError::FullChannel) { 1 } else { 0 }, Ordering::SeqCst);
            })),
        );
        assert_eq!(client.pending_async(), 1, "enqueue attempt still counts toward the cap");

        let env = client.async_chan().recv().unwrap();
        client.cb(env);
        assert_eq!(result.load(Ordering::SeqCst), 1);
        assert_eq!(client.pending_async(), 0);
    }

    #[compio::test]
    async fn close_drains_all_outstanding_async_replies() {
        let client: Client<&'static str> = Client::new(4);
        let completed = Arc::new(AtomicI32::new(0));
        for _ in 0..3 {
            let completed2 = completed.clone();
            client.async_call(
                "x",
                Box::new(()),
                Callback::Zero(Box::new(move |_| {
                    completed2.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        assert_eq!(client.pending_async(), 3);
        client.close().await;
        assert_eq!(completed.load(Ordering::SeqCst), 3);
        assert!(client.is_idle());
    }
}
