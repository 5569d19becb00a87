//! Fan-out onto the worker pool with a structured callback back onto the
//! owning skeleton's loop.
//!
//! `go(f, cb)` is how handler code offloads work that must not serialize
//! with the rest of the module's handlers: `f` runs on the [`WorkerPool`],
//! and once it returns, `cb` (if any) is queued for the loop to run in its
//! own thread of control.

use crate::worker::WorkerPool;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A queued callback, boxed so `f`'s return type doesn't leak into the
/// helper's channel type.
pub type Job = Box<dyn FnOnce() + Send>;

/// Worker-pool fan-out helper owned by exactly one skeleton.
pub struct GoHelper {
    pool: WorkerPool,
    cb_tx: flume::Sender<Job>,
    cb_rx: flume::Receiver<Job>,
    pending: Arc<AtomicUsize>,
}

impl GoHelper {
    #[must_use]
    pub fn new(pool: WorkerPool) -> Self {
        let (cb_tx, cb_rx) = flume::unbounded();
        Self {
            pool,
            cb_tx,
            cb_rx,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Calls still in flight (submitted but not yet serviced by [`GoHelper::cb`]
    /// or, for callback-less calls, not yet returned).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Run `f` on the worker pool; if `cb` is given, queue it for the loop
    /// once `f` returns. Decrements the pending counter exactly once per
    /// call, whether `cb` is present, absent, or the submission itself was
    /// dropped for saturation.
    pub fn go(&self, f: impl FnOnce() + Send + 'static, cb: Option<Job>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = self.pending.clone();
        let tx = self.cb_tx.clone();
        let submitted = self.pool.submit(move || {
            f();
            match cb {
                Some(cb) => {
                    let _ = tx.send(cb);
                }
                None => {
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
            }
        });
        if !submitted {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Run one queued callback (panic-recovered), decrementing the pending
    /// counter. Called by the owning skeleton's loop whenever `chan()` is
    /// ready.
    pub fn cb(&self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("go-helper callback panicked");
        }
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// The receive end of the callback queue, selected on by the owning
    /// skeleton's loop.
    #[must_use]
    pub fn chan(&self) -> flume::Receiver<Job> {
        self.cb_rx.clone()
    }

    /// Wait until the pending counter reaches zero, servicing the callback
    /// channel itself in the meantime. Async so waiting never parks the
    /// compio executor thread the rest of the skeleton loop runs on.
    pub async fn close(&self) {
        while !self.is_idle() {
            match self.cb_rx.recv_async().await {
                Ok(job) => self.cb(job),
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[compio::test]
    async fn go_without_callback_decrements_once_run() {
        let helper = GoHelper::new(WorkerPool::unbounded());
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        helper.go(move || ran2.store(true, Ordering::SeqCst), None);

        for _ in 0..1000 {
            if helper.is_idle() {
                break;
            }
            compio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(ran.load(Ordering::SeqCst));
        assert!(helper.is_idle());
    }

    #[compio::test]
    async fn go_with_callback_runs_via_cb_and_then_decrements() {
        let helper = GoHelper::new(WorkerPool::unbounded());
        let f_ran = Arc::new(AtomicBool::new(false));
        let cb_ran = Arc::new(AtomicBool::new(false));
        let f_ran2 = f_ran.clone();
        let cb_ran2 = cb_ran.clone();
        helper.go(
            move || f_ran2.store(true, Ordering::SeqCst),
            Some(Box::new(move || cb_ran2.store(true, Ordering::SeqCst))),
        );

        let job = helper.chan().recv_async().await.unwrap();
        helper.cb(job);
        assert!(f_ran.load(Ordering::SeqCst));
        assert!(cb_ran.load(Ordering::SeqCst));
        assert!(helper.is_idle());
    }

    #[test]
    fn submission_past_ceiling_still_balances_pending_counter() {
        let helper = GoHelper::new(WorkerPool::with_ceiling(0));
        helper.go(|| {}, None);
        assert!(helper.is_idle(), "dropped submission must not leak pending count");
    }

    #[compio::test]
    async fn close_drains_callback_channel_until_idle() {
        let helper = GoHelper::new(WorkerPool::unbounded());
        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let completed2 = completed.clone();
            helper.go(
                || {},
                Some(Box::new(move || {
                    completed2.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        helper.close().await;
        assert_eq!(completed.load(Ordering::SeqCst), 5);
        assert!(helper.is_idle());
    }
}
