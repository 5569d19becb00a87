//! Process-wide, non-blocking task submission surface shared by write
//! pumps, accept/dial loops, agent read loops, direct message-handler
//! dispatch, timer-job delivery, and `Go`-helper fan-out.
//!
//! `submit` never blocks the caller. With a configured ceiling, exceeding
//! it fails the submission (logged) rather than queuing — callers doing
//! essential work (read/accept loops) must size the ceiling so it never
//! saturates on those; everything else is best-effort.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A cheaply-cloneable handle onto the shared pool. Clones share the same
/// in-flight counter.
#[derive(Clone)]
pub struct WorkerPool {
    ceiling: Option<usize>,
    in_flight: Arc<AtomicUsize>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl WorkerPool {
    /// A pool with no submission ceiling.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            ceiling: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A pool that refuses submissions once `ceiling` tasks are in flight.
    #[must_use]
    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            ceiling: Some(ceiling),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit a closure for best-effort execution. Returns `false` without
    /// running `f` if the pool is at its ceiling.
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.submit_future(async move { f() })
    }

    /// Submit a future for best-effort execution, same saturation policy as
    /// [`WorkerPool::submit`].
    pub fn submit_future<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(ceiling) = self.ceiling {
            if self.in_flight.fetch_add(1, Ordering::AcqRel) >= ceiling {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                tracing::error!(ceiling, "worker pool saturated, dropping submission");
                return false;
            }
        }

        let in_flight = self.in_flight.clone();
        let has_ceiling = self.ceiling.is_some();
        compio::runtime::spawn(async move {
            fut.await;
            if has_ceiling {
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
        })
        .detach();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[compio::test]
    async fn submit_runs_the_closure() {
        let pool = WorkerPool::unbounded();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        assert!(pool.submit(move || ran2.store(true, Ordering::SeqCst)));

        for _ in 0..100 {
            if ran.load(Ordering::SeqCst) {
                break;
            }
            compio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn submit_past_ceiling_is_rejected_without_running() {
        let pool = WorkerPool::with_ceiling(0);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        assert!(!pool.submit(move || ran2.store(true, Ordering::SeqCst)));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
