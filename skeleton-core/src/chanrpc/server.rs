use super::{Args, ChanRpcError, Envelope, Reply};
use crate::status::AtomicStatus;
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

/// A function registered under `call0`: runs for effect, no reply value.
type Fn0 = Arc<dyn Fn(Args) + Send + Sync>;
/// A function registered under `call1`: produces exactly one value.
type Fn1 = Arc<dyn Fn(Args) -> Box<dyn Any + Send> + Send + Sync>;
/// A function registered under `call_n`: produces a variable-length list.
type FnN = Arc<dyn Fn(Args) -> Vec<Box<dyn Any + Send>> + Send + Sync>;

enum Function {
    Call0(Fn0),
    Call1(Fn1),
    CallN(FnN),
}

/// One unit of queued work: the function id, its type-erased arguments, and
/// an optional reply channel (absent for fire-and-forget `Go` calls).
pub struct CallInfo<K> {
    pub(crate) id: K,
    pub(crate) args: Args,
    pub(crate) reply_tx: Option<flume::Sender<Envelope>>,
    /// Opaque callback payload, round-tripped unexamined into the `Envelope`
    /// delivered to `reply_tx`. Only meaningful to async callers.
    pub(crate) cb: Option<Args>,
}

impl<K> CallInfo<K> {
    fn fire_and_forget(id: K, args: Args) -> Self {
        Self {
            id,
            args,
            reply_tx: None,
            cb: None,
        }
    }
}

/// The three registration shapes a caller may invoke a registered function
/// through. Kept as a trait so `Server::exec` can dispatch without knowing
/// which shape was used to register.
pub trait Exec<K> {
    /// Run the call queue's next item to completion, delivering a `Result`
    /// to its reply channel (if any). Panics inside the registered function
    /// are caught and converted into `ChanRpcError::HandlerPanic`.
    fn exec(&self, call: CallInfo<K>);
}

struct Inner<K> {
    functions: RwLock<HashMap<K, Function>>,
    sender: Mutex<Option<flume::Sender<CallInfo<K>>>>,
    receiver: flume::Receiver<CallInfo<K>>,
    status: AtomicStatus,
}

/// Queued, cooperative RPC endpoint of a module.
///
/// Cheaply cloneable: clones share the same function table and call queue,
/// which is how a [`Client`](super::Client) attaches to it.
pub struct Server<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for Server<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Server<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a server whose call queue holds up to `cap` pending calls.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        let (sender, receiver) = flume::bounded(cap);
        Self {
            inner: Arc::new(Inner {
                functions: RwLock::new(HashMap::new()),
                sender: Mutex::new(Some(sender)),
                receiver,
                status: AtomicStatus::new_running(),
            }),
        }
    }

    fn register_raw(&self, id: K, f: Function) -> Result<(), ChanRpcError> {
        if self.inner.status.is_closed() {
            return Err(ChanRpcError::ServerClosed);
        }
        let mut table = self.inner.functions.write().unwrap();
        if table.contains_key(&id) {
            return Err(ChanRpcError::RepeatedRegister);
        }
        table.insert(id, f);
        Ok(())
    }

    /// Register a zero-result function under `id`.
    pub fn register0(
        &self,
        id: K,
        f: impl Fn(Args) + Send + Sync + 'static,
    ) -> Result<(), ChanRpcError> {
        self.register_raw(id, Function::Call0(Arc::new(f)))
    }

    /// Register a single-result function under `id`.
    pub fn register1(
        &self,
        id: K,
        f: impl Fn(Args) -> Box<dyn Any + Send> + Send + Sync + 'static,
    ) -> Result<(), ChanRpcError> {
        self.register_raw(id, Function::Call1(Arc::new(f)))
    }

    /// Register a multi-result function under `id`.
    pub fn register_n(
        &self,
        id: K,
        f: impl Fn(Args) -> Vec<Box<dyn Any + Send>> + Send + Sync + 'static,
    ) -> Result<(), ChanRpcError> {
        self.register_raw(id, Function::CallN(Arc::new(f)))
    }

    fn is_registered(&self, id: &K) -> bool {
        self.inner.functions.read().unwrap().contains_key(id)
    }

    /// Fire-and-forget dispatch. A silent no-op if `id` has nothing
    /// registered. Blocks the caller if the call queue is full — this is
    /// the backpressure point for cross-module traffic.
    pub fn go(&self, id: K, args: Args) {
        if !self.is_registered(&id) {
            return;
        }
        let _ = self.call(CallInfo::fire_and_forget(id, args), true);
    }

    /// Enqueue a call, blocking or failing fast depending on `block`. On
    /// failure the un-enqueued `CallInfo` (and whatever `cb` it carried) is
    /// handed back so a non-blocking caller can still deliver a result to
    /// its own reply channel instead of losing the callback.
    ///
    /// Enqueue is gated on the close flag under the same lock `close` takes,
    /// so a `call` racing a `Close` observes `ServerClosed` rather than
    /// sending on a torn-down queue.
    pub(crate) fn call(&self, ci: CallInfo<K>, block: bool) -> Result<(), (ChanRpcError, CallInfo<K>)> {
        let guard = self.inner.sender.lock().unwrap();
        match guard.as_ref() {
            None => Err((ChanRpcError::ServerClosed, ci)),
            Some(tx) => {
                if block {
                    tx.send(ci).map_err(|e| (ChanRpcError::ServerClosed, e.into_inner()))
                } else {
                    tx.try_send(ci).map_err(|e| match e {
                        flume::TrySendError::Full(ci) => (ChanRpcError::FullChannel, ci),
                        flume::TrySendError::Disconnected(ci) => (ChanRpcError::ServerClosed, ci),
                    })
                }
            }
        }
    }

    /// The receive end of the call queue, selected on by the owning
    /// skeleton's loop.
    #[must_use]
    pub fn chan(&self) -> flume::Receiver<CallInfo<K>> {
        self.inner.receiver.clone()
    }

    /// Is the server closed?
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.status.is_closed()
    }

    /// Close the server: idempotent, drains remaining calls with
    /// `ServerClosed` delivered to any that have a reply channel.
    pub fn close(&self) {
        if !self.inner.status.close() {
            return;
        }
        self.inner.sender.lock().unwrap().take();
        while let Ok(ci) = self.inner.receiver.try_recv() {
            if let Some(tx) = ci.reply_tx {
                let _ = tx.send(Envelope {
                    result: Err(ChanRpcError::ServerClosed),
                    cb: ci.cb,
                });
            }
        }
    }
}

impl<K> Exec<K> for Server<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn exec(&self, call: CallInfo<K>) {
        let CallInfo {
            id,
            args,
            reply_tx,
            cb,
        } = call;
        let f = {
            let table = self.inner.functions.read().unwrap();
            match table.get(&id) {
                Some(Function::Call0(f)) => Function::Call0(f.clone()),
                Some(Function::Call1(f)) => Function::Call1(f.clone()),
                Some(Function::CallN(f)) => Function::CallN(f.clone()),
                None => {
                    if let Some(tx) = reply_tx {
                        let _ = tx.send(Envelope {
                            result: Err(ChanRpcError::NotRegistered),
                            cb,
                        });
                    }
                    return;
                }
            }
        };

        let result = match f {
            Function::Call0(f) => {
                catch_unwind(AssertUnwindSafe(|| f(args))).map(|()| Reply::None)
            }
            Function::Call1(f) => {
                catch_unwind(AssertUnwindSafe(|| f(args))).map(Reply::One)
            }
            Function::CallN(f) => {
                catch_unwind(AssertUnwindSafe(|| f(args))).map(Reply::Many)
            }
        };

        if let Some(tx) = reply_tx {
            let result =
                result.map_err(|payload| ChanRpcError::HandlerPanic(panic_message(&payload)));
            let _ = tx.send(Envelope { result, cb });
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
