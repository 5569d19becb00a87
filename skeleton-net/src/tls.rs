//! TLS configuration seam.
//!
//! The connection pipeline runs over plain `compio::net::TcpStream` duplicated
//! via raw file descriptors (see [`crate::tcp_opts`]); wiring in real TLS
//! would mean terminating it before a stream ever reaches
//! [`crate::connection::TcpConnection`]/[`crate::connection::WsConnection`].
//! Nothing in this crate performs that termination — [`TlsConfigLoader`] is
//! the seam a caller fills in with their own `rustls`/`native-tls` glue. The
//! shipped default refuses any listener/dialer configured with
//! [`crate::config::TlsOptions`] rather than silently serving plaintext.

use crate::config::TlsOptions;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Validates TLS configuration for a listener or dialer before it starts
/// accepting/dialing.
#[async_trait]
pub trait TlsConfigLoader: Send + Sync {
    /// # Errors
    /// Returns an error if `options` cannot be turned into a usable TLS
    /// configuration.
    async fn validate(&self, options: &TlsOptions) -> Result<()>;
}

/// The default loader: always rejects. Acceptors/dialers built with
/// [`TlsOptions`] but no real loader fail fast at startup instead of opening
/// a listener that silently ignores its TLS configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTlsConfigLoader;

#[async_trait]
impl TlsConfigLoader for NoTlsConfigLoader {
    async fn validate(&self, _options: &TlsOptions) -> Result<()> {
        Err(Error::TlsNotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn no_tls_loader_rejects_any_options() {
        let loader = NoTlsConfigLoader;
        let err = loader.validate(&TlsOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::TlsNotConfigured));
    }
}
