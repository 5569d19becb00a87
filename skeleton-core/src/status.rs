//! Monotonic tri-state status shared by every long-lived component that
//! needs an idempotent, CAS-guarded `Close`: chanRPC servers, the skeleton,
//! modules, connections, acceptors and dialers.
//!
//! Status only ever moves forward: `Initial -> Running -> Closed`. Closing
//! twice is a no-op for the second caller, which is what makes `Close`
//! idempotent everywhere it's used.

use std::sync::atomic::{AtomicI8, Ordering};

const INITIAL: i8 = 0;
const RUNNING: i8 = 1;
const CLOSED: i8 = -1;

/// A CAS-guarded status cell.
#[derive(Debug)]
pub struct AtomicStatus(AtomicI8);

impl Default for AtomicStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicStatus {
    /// A status cell starting at `Initial`.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicI8::new(INITIAL))
    }

    /// A status cell starting at `Running` (used where there is no distinct
    /// initial phase, e.g. the chanRPC server).
    #[must_use]
    pub const fn new_running() -> Self {
        Self(AtomicI8::new(RUNNING))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire) == RUNNING
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire) == CLOSED
    }

    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.0.load(Ordering::Acquire) == INITIAL
    }

    /// Attempt `Initial -> Running`. Returns `true` iff this call performed
    /// the transition.
    pub fn start(&self) -> bool {
        self.0
            .compare_exchange(INITIAL, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempt `Running -> Closed`. Returns `true` iff this call performed
    /// the transition (i.e. this caller is the one that actually closes it).
    pub fn close(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempt `Initial -> Closed` or `Running -> Closed`, whichever applies.
    /// Used by components that may be closed before ever starting.
    pub fn close_from_any(&self) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current == CLOSED {
                return false;
            }
            if self
                .0
                .compare_exchange(current, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_initial() {
        let s = AtomicStatus::new();
        assert!(s.is_initial());
    }

    #[test]
    fn start_then_close_once() {
        let s = AtomicStatus::new();
        assert!(s.start());
        assert!(!s.start(), "second start must not transition again");
        assert!(s.is_running());
        assert!(s.close());
        assert!(!s.close(), "second close must not transition again");
        assert!(s.is_closed());
    }

    #[test]
    fn close_from_any_is_idempotent() {
        let s = AtomicStatus::new();
        assert!(s.close_from_any());
        assert!(!s.close_from_any());
        assert!(s.is_closed());
    }
}
