//! Builder-pattern configuration structs for every network-facing component,
//! mirroring the core crate's `SocketOptions` pattern: an immutable struct
//! with a `Default` impl carrying the documented defaults, and consuming
//! `with_*` setters.

use std::time::Duration;

/// Header width for the TCP frame parser's length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLen {
    One,
    Two,
    Four,
}

impl HeaderLen {
    /// The largest payload length this header width can represent.
    #[must_use]
    pub const fn max_representable(self) -> u64 {
        match self {
            HeaderLen::One => u8::MAX as u64,
            HeaderLen::Two => u16::MAX as u64,
            HeaderLen::Four => u32::MAX as u64,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            HeaderLen::One => 1,
            HeaderLen::Two => 2,
            HeaderLen::Four => 4,
        }
    }
}

/// Frame parser configuration: header width, endianness, and payload bounds.
///
/// `min`/`max` are clamped at construction time (not at call time) down to
/// whatever the configured header width can represent.
#[derive(Debug, Clone, Copy)]
pub struct FrameOptions {
    pub header_len: HeaderLen,
    pub little_endian: bool,
    pub min_len: u64,
    pub max_len: u64,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            header_len: HeaderLen::Two,
            little_endian: false,
            min_len: 1,
            max_len: 4096,
        }
    }
}

impl FrameOptions {
    #[must_use]
    pub fn with_header_len(mut self, header_len: HeaderLen) -> Self {
        self.header_len = header_len;
        self.clamp()
    }

    #[must_use]
    pub fn with_little_endian(mut self, little_endian: bool) -> Self {
        self.little_endian = little_endian;
        self
    }

    #[must_use]
    pub fn with_min_len(mut self, min_len: u64) -> Self {
        self.min_len = min_len;
        self.clamp()
    }

    #[must_use]
    pub fn with_max_len(mut self, max_len: u64) -> Self {
        self.max_len = max_len;
        self.clamp()
    }

    fn clamp(mut self) -> Self {
        let ceiling = self.header_len.max_representable();
        if self.min_len > ceiling {
            self.min_len = ceiling;
        }
        if self.max_len > ceiling {
            self.max_len = ceiling;
        }
        self
    }
}

/// Client-auth policy for a TLS listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthPolicy {
    Require,
    RequireAndVerify,
    None,
}

/// TLS configuration. The cert/key/rootCA paths and policy are real; the
/// loader that turns them into a `rustls`/`native-tls` acceptor/connector is
/// an external collaborator behind [`crate::tls::TlsConfigLoader`].
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub root_ca_path: Option<String>,
    pub client_auth: Option<ClientAuthPolicy>,
    pub min_version: Option<&'static str>,
}

impl TlsOptions {
    #[must_use]
    pub fn with_cert(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self
    }

    #[must_use]
    pub fn with_root_ca(mut self, path: impl Into<String>) -> Self {
        self.root_ca_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_client_auth(mut self, policy: ClientAuthPolicy) -> Self {
        self.client_auth = Some(policy);
        self
    }

    #[must_use]
    pub fn with_min_version(mut self, version: &'static str) -> Self {
        self.min_version = Some(version);
        self
    }
}

/// TCP server (acceptor) configuration.
#[derive(Debug, Clone)]
pub struct TcpServerOptions {
    pub addr: String,
    pub max_retry: u32,
    pub max_conn: usize,
    pub write_buffer: usize,
    pub tls: Option<TlsOptions>,
    pub frame: FrameOptions,
}

impl TcpServerOptions {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            max_retry: 7,
            max_conn: usize::MAX,
            write_buffer: 100,
            tls: None,
            frame: FrameOptions::default(),
        }
    }

    #[must_use]
    pub fn with_max_retry(mut self, n: u32) -> Self {
        self.max_retry = n;
        self
    }

    #[must_use]
    pub fn with_max_conn(mut self, n: usize) -> Self {
        self.max_conn = n;
        self
    }

    #[must_use]
    pub fn with_write_buffer(mut self, n: usize) -> Self {
        self.write_buffer = n;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn with_frame(mut self, frame: FrameOptions) -> Self {
        self.frame = frame;
        self
    }
}

/// TCP client (dialer) configuration.
#[derive(Debug, Clone)]
pub struct TcpClientOptions {
    pub addr: String,
    pub conn_num: usize,
    pub auto_reconnect: bool,
    pub write_buffer: usize,
    pub connect_interval: Duration,
    pub tls: Option<TlsOptions>,
    pub frame: FrameOptions,
}

impl TcpClientOptions {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn_num: 1,
            auto_reconnect: false,
            write_buffer: 100,
            connect_interval: Duration::from_secs(3),
            tls: None,
            frame: FrameOptions::default(),
        }
    }

    #[must_use]
    pub fn with_conn_num(mut self, n: usize) -> Self {
        self.conn_num = n;
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, on: bool) -> Self {
        self.auto_reconnect = on;
        self
    }

    #[must_use]
    pub fn with_write_buffer(mut self, n: usize) -> Self {
        self.write_buffer = n;
        self
    }

    #[must_use]
    pub fn with_connect_interval(mut self, d: Duration) -> Self {
        self.connect_interval = d;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn with_frame(mut self, frame: FrameOptions) -> Self {
        self.frame = frame;
        self
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone)]
pub struct WsServerOptions {
    pub addr: String,
    pub max_conn: usize,
    pub write_buffer: usize,
    pub msg_max_len: u64,
    pub http_timeout: Duration,
    pub tls: Option<TlsOptions>,
}

impl WsServerOptions {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            max_conn: usize::MAX,
            write_buffer: 10_000,
            msg_max_len: u32::MAX as u64,
            http_timeout: Duration::from_secs(10),
            tls: None,
        }
    }

    #[must_use]
    pub fn with_max_conn(mut self, n: usize) -> Self {
        self.max_conn = n;
        self
    }

    #[must_use]
    pub fn with_write_buffer(mut self, n: usize) -> Self {
        self.write_buffer = n;
        self
    }

    #[must_use]
    pub fn with_msg_max_len(mut self, n: u64) -> Self {
        self.msg_max_len = n;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, d: Duration) -> Self {
        self.http_timeout = d;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// WebSocket client configuration.
#[derive(Debug, Clone)]
pub struct WsClientOptions {
    pub addr: String,
    pub conn_num: usize,
    pub auto_reconnect: bool,
    pub connect_interval: Duration,
    pub msg_max_len: u64,
    pub write_buffer: usize,
    pub handshake_timeout: Duration,
    pub tls: Option<TlsOptions>,
}

impl WsClientOptions {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn_num: 1,
            auto_reconnect: false,
            connect_interval: Duration::from_secs(3),
            msg_max_len: 4096,
            write_buffer: 100,
            handshake_timeout: Duration::from_secs(10),
            tls: None,
        }
    }

    #[must_use]
    pub fn with_conn_num(mut self, n: usize) -> Self {
        self.conn_num = n;
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, on: bool) -> Self {
        self.auto_reconnect = on;
        self
    }

    #[must_use]
    pub fn with_connect_interval(mut self, d: Duration) -> Self {
        self.connect_interval = d;
        self
    }

    #[must_use]
    pub fn with_msg_max_len(mut self, n: u64) -> Self {
        self.msg_max_len = n;
        self
    }

    #[must_use]
    pub fn with_write_buffer(mut self, n: usize) -> Self {
        self.write_buffer = n;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_options_clamp_bounds_to_header_width() {
        let opts = FrameOptions::default()
            .with_header_len(HeaderLen::One)
            .with_max_len(1_000_000);
        assert_eq!(opts.max_len, 255);
    }

    #[test]
    fn frame_options_clamp_applies_regardless_of_setter_order() {
        let opts = FrameOptions::default()
            .with_max_len(1_000_000)
            .with_header_len(HeaderLen::One);
        assert_eq!(opts.max_len, 255);
    }

    #[test]
    fn tcp_server_defaults_match_spec() {
        let opts = TcpServerOptions::new("127.0.0.1:0");
        assert_eq!(opts.max_retry, 7);
        assert_eq!(opts.max_conn, usize::MAX);
        assert_eq!(opts.write_buffer, 100);
    }

    #[test]
    fn ws_server_defaults_match_spec() {
        let opts = WsServerOptions::new("127.0.0.1:0");
        assert_eq!(opts.write_buffer, 10_000);
        assert_eq!(opts.http_timeout, Duration::from_secs(10));
    }
}
