//! Profiling HTTP mux seam.
//!
//! The orchestrator accepts a profile listen address on
//! [`crate::module::OrchestratorOptions`] but the actual pprof/profiling
//! HTTP server is an external collaborator, specified only at this trait
//! boundary. Unlike [`crate::signal`]'s shutdown path or `skeleton-net`'s
//! `TlsConfigLoader`, a missing profiling hook is not an error — profiling
//! is diagnostic, not load-bearing, so the default quietly does nothing.

use crate::error::Result;
use async_trait::async_trait;

/// Serves a profiling HTTP mux (e.g. `pprof`-style endpoints) on `addr`.
#[async_trait]
pub trait ProfileHook: Send + Sync {
    /// # Errors
    /// Returns an error if the mux fails to bind or serve.
    async fn serve(&self, addr: &str) -> Result<()>;
}

/// The default hook: does nothing. An orchestrator configured with a
/// `profile_addr` but no real hook simply skips profiling rather than
/// failing startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProfileHook;

#[async_trait]
impl ProfileHook for NoopProfileHook {
    async fn serve(&self, addr: &str) -> Result<()> {
        tracing::debug!(addr, "no profiling hook configured, skipping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn noop_hook_is_infallible() {
        let hook = NoopProfileHook;
        hook.serve("127.0.0.1:6060").await.unwrap();
    }
}
