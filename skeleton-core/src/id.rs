//! Process-unique id generation.
//!
//! The real machine-id snowflake generator (coordination with peers over a
//! distributed lock) is an external collaborator, specified only at this
//! trait boundary. [`MonotonicId`] is a trivial default so the orchestrator
//! has something to call when no real generator is wired in.

use std::sync::atomic::{AtomicU64, Ordering};

/// A source of process-unique, monotonically non-repeating ids. The
/// orchestrator calls `next_id` exactly once, before any module's `Init`.
pub trait SnowflakeId: Send + Sync {
    fn next_id(&self) -> u64;
}

/// A bare incrementing counter, starting at 0. Good enough for a single
/// process; a real deployment supplies its own [`SnowflakeId`] backed by
/// machine-id + timestamp + sequence bits.
#[derive(Debug, Default)]
pub struct MonotonicId(AtomicU64);

impl MonotonicId {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

impl SnowflakeId for MonotonicId {
    fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically() {
        let gen = MonotonicId::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert!(b > a);
    }
}
