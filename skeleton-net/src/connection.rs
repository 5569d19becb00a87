//! TCP/WS connection: a framed write pump over a bounded queue, and a read
//! path that takes its own stream handle out of a slot for the duration of
//! each read. Both sides observe one CAS-guarded close flag.
//!
//! compio has no `split`/`into_split` for `TcpStream` — the write pump and
//! whoever calls `read_msg` each need their own I/O handle onto the same
//! kernel socket. [`crate::tcp_opts::duplicate`] hands out a second,
//! independently owned `TcpStream` for exactly that purpose, so the two
//! sides never share a stream. `read_msg` takes `&self` rather than
//! `&mut self` so a `Connection` can live behind an `Arc` and be read from
//! one task while written to from others — the read-half slot uses the same
//! take-then-put-back pattern as the write pump, never holding the mutex
//! across an `.await`.

use crate::config::FrameOptions;
use crate::error::{Error, Result};
use crate::frame::FrameCodec;
use crate::tcp_opts;
use crate::ws::WsCodec;
use async_trait::async_trait;
use bytes::Bytes;
use compio::io::AsyncWriteExt;
use compio::net::TcpStream;
use skeleton_core::status::AtomicStatus;
use skeleton_core::worker::WorkerPool;
use std::sync::{Arc, Mutex};

type StreamSlot = Arc<Mutex<Option<TcpStream>>>;

/// A connection that frames and enqueues outgoing messages, and reads
/// incoming ones off its own stream handle.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Frame `buffers` and enqueue them for the write pump. If the queue is
    /// full, the connection is destroyed inline and the write is dropped.
    async fn write_msg(&self, buffers: &[&[u8]]) -> Result<()>;

    /// Read the next message off the connection.
    async fn read_msg(&self) -> Result<Bytes>;

    #[must_use]
    fn is_closed(&self) -> bool;

    /// Idempotent teardown: linger-zero the socket, close it, close the
    /// write queue. Safe to call more than once or concurrently.
    fn do_destroy(&self);
}

/// Take the stream out of `slot` for the duration of one I/O call — never
/// holds the mutex across an `.await`, so a concurrent `do_destroy` can
/// always take the lock.
fn take_stream(slot: &StreamSlot) -> Option<TcpStream> {
    slot.lock().expect("stream slot poisoned").take()
}

/// Put a stream taken via [`take_stream`] back, unless `do_destroy` closed
/// the connection while the I/O call was in flight — in that race the
/// stream is simply dropped instead of being resurrected into a slot a
/// concurrent `do_destroy` already considers empty.
fn put_stream_back(slot: &StreamSlot, status: &AtomicStatus, stream: TcpStream) {
    if status.is_closed() {
        return;
    }
    *slot.lock().expect("stream slot poisoned") = Some(stream);
}

/// TCP connection: length-prefixed framing via [`FrameCodec`], a bounded
/// `flume` channel feeding an independent write-pump task.
pub struct TcpConnection {
    status: Arc<AtomicStatus>,
    read_half: StreamSlot,
    write_half: StreamSlot,
    write_tx: Mutex<Option<flume::Sender<Bytes>>>,
    codec: FrameCodec,
}

impl TcpConnection {
    /// Wrap `stream`, spawning the write pump immediately.
    ///
    /// # Errors
    /// Returns an error if the stream's descriptor cannot be duplicated.
    pub fn new(stream: TcpStream, frame: FrameOptions, write_buffer: usize, pool: &WorkerPool) -> Result<Self> {
        let status = Arc::new(AtomicStatus::new_running());
        let read_half = Arc::new(Mutex::new(Some(tcp_opts::duplicate(&stream)?)));
        let write_half = Arc::new(Mutex::new(Some(stream)));
        let (write_tx, write_rx) = flume::bounded::<Bytes>(write_buffer.max(1));

        let pump_status = status.clone();
        let pump_write_half = write_half.clone();
        pool.submit_future(async move {
            tcp_write_pump(pump_write_half, write_rx, pump_status).await;
        });

        Ok(Self {
            status,
            read_half,
            write_half,
            write_tx: Mutex::new(Some(write_tx)),
            codec: FrameCodec::new(frame),
        })
    }
}

async fn tcp_write_pump(write_half: StreamSlot, write_rx: flume::Receiver<Bytes>, status: Arc<AtomicStatus>) {
    while let Ok(buf) = write_rx.recv_async().await {
        let Some(mut stream) = take_stream(&write_half) else {
            break;
        };
        let compio::buf::BufResult(result, _) = stream.write_all(buf.to_vec()).await;
        if result.is_err() {
            status.close_from_any();
            break;
        }
        put_stream_back(&write_half, &status, stream);
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn write_msg(&self, buffers: &[&[u8]]) -> Result<()> {
        if self.status.is_closed() {
            return Err(Error::ConnClosed);
        }
        let framed = self.codec.packet(buffers)?;
        let tx = self.write_tx.lock().expect("write-tx mutex poisoned").clone();
        let Some(tx) = tx else {
            return Err(Error::ConnClosed);
        };
        if tx.try_send(framed).is_err() {
            self.do_destroy();
            return Err(Error::ConnClosed);
        }
        Ok(())
    }

    async fn read_msg(&self) -> Result<Bytes> {
        if self.status.is_closed() {
            return Err(Error::ConnClosed);
        }
        let Some(mut stream) = take_stream(&self.read_half) else {
            return Err(Error::ConnClosed);
        };
        let result = self.codec.unpacket(&mut stream).await;
        if result.is_ok() {
            put_stream_back(&self.read_half, &self.status, stream);
        }
        result.map_err(Error::Io)
    }

    fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    fn do_destroy(&self) {
        if !self.status.close_from_any() {
            return;
        }
        if let Ok(mut guard) = self.write_half.lock() {
            if let Some(stream) = guard.as_ref() {
                let _ = tcp_opts::set_linger_zero(stream);
            }
            *guard = None; // drop closes the socket
        }
        if let Ok(mut guard) = self.read_half.lock() {
            *guard = None;
        }
        // Dropping the last sender closes the channel; the pump observes
        // that on its next `recv_async` and exits.
        self.write_tx.lock().expect("write-tx mutex poisoned").take();
    }
}

/// WebSocket connection: binary-message framing via [`WsCodec`] instead of
/// the length-prefix codec — WS frames already carry their own length, and
/// the read side answers pings inline (see [`WsCodec::read_message`]).
///
/// The write pump and a `read_msg` call each write through their own
/// duplicated fd; a pong written from the read side and a queued message
/// written from the pump can interleave in arrival order but never mid-frame,
/// since each is one `write_all` call the kernel appends atomically to the
/// socket's send buffer.
pub struct WsConnection {
    status: Arc<AtomicStatus>,
    read_half: StreamSlot,
    write_half: StreamSlot,
    write_tx: Mutex<Option<flume::Sender<Bytes>>>,
    codec: WsCodec,
}

impl WsConnection {
    /// Wrap an already-upgraded `stream`, spawning the write pump
    /// immediately. `is_server` and `msg_max_len` configure [`WsCodec`].
    ///
    /// # Errors
    /// Returns an error if the stream's descriptor cannot be duplicated.
    pub fn new(
        stream: TcpStream,
        is_server: bool,
        msg_max_len: u64,
        write_buffer: usize,
        pool: &WorkerPool,
    ) -> Result<Self> {
        let status = Arc::new(AtomicStatus::new_running());
        let read_half = Arc::new(Mutex::new(Some(tcp_opts::duplicate(&stream)?)));
        let write_half = Arc::new(Mutex::new(Some(stream)));
        let (write_tx, write_rx) = flume::bounded::<Bytes>(write_buffer.max(1));
        let codec = WsCodec::new(is_server, msg_max_len);

        let pump_status = status.clone();
        let pump_write_half = write_half.clone();
        let pump_codec = codec;
        pool.submit_future(async move {
            ws_write_pump(pump_write_half, write_rx, pump_status, pump_codec).await;
        });

        Ok(Self {
            status,
            read_half,
            write_half,
            write_tx: Mutex::new(Some(write_tx)),
            codec,
        })
    }
}

async fn ws_write_pump(
    write_half: StreamSlot,
    write_rx: flume::Receiver<Bytes>,
    status: Arc<AtomicStatus>,
    codec: WsCodec,
) {
    while let Ok(payload) = write_rx.recv_async().await {
        let Some(mut stream) = take_stream(&write_half) else {
            break;
        };
        let result = codec.write_message(&mut stream, &payload).await;
        if result.is_err() {
            status.close_from_any();
            break;
        }
        put_stream_back(&write_half, &status, stream);
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn write_msg(&self, buffers: &[&[u8]]) -> Result<()> {
        if self.status.is_closed() {
            return Err(Error::ConnClosed);
        }
        let mut payload = Vec::new();
        for b in buffers {
            payload.extend_from_slice(b);
        }
        let tx = self.write_tx.lock().expect("write-tx mutex poisoned").clone();
        let Some(tx) = tx else {
            return Err(Error::ConnClosed);
        };
        if tx.try_send(Bytes::from(payload)).is_err() {
            self.do_destroy();
            return Err(Error::ConnClosed);
        }
        Ok(())
    }

    async fn read_msg(&self) -> Result<Bytes> {
        if self.status.is_closed() {
            return Err(Error::ConnClosed);
        }
        let Some(mut stream) = take_stream(&self.read_half) else {
            return Err(Error::ConnClosed);
        };
        let result = self.codec.read_message(&mut stream).await;
        if result.is_ok() {
            put_stream_back(&self.read_half, &self.status, stream);
        }
        result
    }

    fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    fn do_destroy(&self) {
        if !self.status.close_from_any() {
            return;
        }
        if let Ok(mut guard) = self.write_half.lock() {
            if let Some(stream) = guard.as_ref() {
                let _ = tcp_opts::set_linger_zero(stream);
            }
            *guard = None;
        }
        if let Ok(mut guard) = self.read_half.lock() {
            *guard = None;
        }
        self.write_tx.lock().expect("write-tx mutex poisoned").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeaderLen;
    use compio::net::{TcpListener, TcpStream};

    #[compio::test]
    async fn write_msg_then_read_msg_round_trips() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let client_stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let pool = WorkerPool::unbounded();
        let client = TcpConnection::new(client_stream, FrameOptions::default(), 8, &pool).unwrap();
        let server = TcpConnection::new(server_stream, FrameOptions::default(), 8, &pool).unwrap();

        client.write_msg(&[b"hello"]).await.unwrap();
        let got = server.read_msg().await.unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[compio::test]
    async fn write_msg_after_destroy_fails() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let client_stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (_server_stream, _) = listener.accept().await.unwrap();

        let pool = WorkerPool::unbounded();
        let client = TcpConnection::new(
            client_stream,
            FrameOptions::default().with_header_len(HeaderLen::One),
            8,
            &pool,
        )
        .unwrap();

        client.do_destroy();
        assert!(client.is_closed());
        let err = client.write_msg(&[b"x"]).await.unwrap_err();
        assert!(matches!(err, Error::ConnClosed));
    }

    #[compio::test]
    async fn do_destroy_is_idempotent() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let client_stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (_server_stream, _) = listener.accept().await.unwrap();

        let pool = WorkerPool::unbounded();
        let client = TcpConnection::new(client_stream, FrameOptions::default(), 8, &pool).unwrap();
        client.do_destroy();
        client.do_destroy();
        assert!(client.is_closed());
    }

    #[compio::test]
    async fn ws_write_msg_then_read_msg_round_trips() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let client_stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let pool = WorkerPool::unbounded();
        let client = WsConnection::new(client_stream, false, 4096, 8, &pool).unwrap();
        let server = WsConnection::new(server_stream, true, 4096, 8, &pool).unwrap();

        client.write_msg(&[b"hello-ws"]).await.unwrap();
        let got = server.read_msg().await.unwrap();
        assert_eq!(&got[..], b"hello-ws");
    }
}
