//! OS signal handling for orderly shutdown.
//!
//! `signal-hook`'s iterator API blocks a real OS thread, so registration
//! and waiting happen on a dedicated background thread; the signal number
//! is forwarded across a one-shot channel the orchestrator awaits
//! cooperatively rather than blocking the compio executor thread.

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

/// Block (asynchronously, from the caller's point of view) until one of
/// SIGINT, SIGTERM, SIGQUIT, or SIGHUP arrives, then return its number.
///
/// # Panics
/// Panics if the process cannot register the signal handlers at all (a
/// configuration bug, not a runtime condition).
pub async fn wait_for_shutdown_signal() -> i32 {
    let (tx, rx) = flume::bounded::<i32>(1);
    std::thread::Builder::new()
        .name("skeleton-signal-wait".into())
        .spawn(move || {
            let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT, SIGHUP])
                .expect("failed to register signal handlers");
            if let Some(sig) = signals.forever().next() {
                let _ = tx.send(sig);
            }
        })
        .expect("failed to spawn signal-waiting thread");

    rx.recv_async().await.unwrap_or(SIGTERM)
}
