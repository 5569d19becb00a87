//! WebSocket (RFC 6455) handshake and binary-message framing.
//!
//! The handshake is a plain-text HTTP/1.1 upgrade parsed by hand (no `http`
//! crate in the dependency stack) over the same owned-buffer `compio` I/O
//! used by [`crate::frame`]. Data frames carry their own length, so unlike
//! the TCP path there is no separate length-prefix codec — masking (always
//! present client→server, never present server→client) and fragmentation
//! are handled directly by [`WsCodec`].

use crate::error::{Error, Result, WsError};
use base64::Engine;
use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use sha1::{Digest, Sha1};

const WS_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

/// A parsed HTTP upgrade request: just enough to validate it and compute
/// `Sec-WebSocket-Accept`.
pub struct HandshakeRequest {
    pub method: String,
    pub key: Option<String>,
}

/// Read one HTTP request (request-line + headers, terminated by a blank
/// line) off `reader` and parse out the bits the handshake needs.
///
/// # Errors
/// Surfaces the underlying I/O error, or [`WsError::MalformedFrame`] if the
/// request has no terminating blank line within a sane header budget.
pub async fn read_handshake_request<S>(reader: &mut S) -> Result<HandshakeRequest>
where
    S: AsyncRead + Unpin,
{
    const MAX_HEADER_BYTES: usize = 16 * 1024;
    let mut buf = BytesMut::new();
    loop {
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(Error::Ws(WsError::MalformedFrame));
        }
        let chunk = vec![0u8; 1];
        let BufResult(result, chunk) = reader.read_exact(chunk).await;
        result.map_err(Error::Io)?;
        buf.extend_from_slice(&chunk);
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let method = request_line.split_whitespace().next().unwrap_or_default().to_string();

    let mut key = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-key") {
                key = Some(value.trim().to_string());
            }
        }
    }

    Ok(HandshakeRequest { method, key })
}

/// Compute `Sec-WebSocket-Accept` for a client-supplied key.
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_MAGIC.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Validate the request and write the `101 Switching Protocols` response.
/// Reads then writes sequentially on the same stream — the handshake has
/// no concurrent-I/O requirement, unlike the data phase's read loop and
/// write pump.
///
/// # Errors
/// [`WsError::NotGet`] if the method isn't `GET`, [`WsError::MissingKey`] if
/// there's no `Sec-WebSocket-Key` header, or the underlying write error.
pub async fn accept_handshake<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_handshake_request(stream).await?;
    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(Error::Ws(WsError::NotGet));
    }
    let key = request.key.ok_or(Error::Ws(WsError::MissingKey))?;
    let accept = accept_key(&key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    let BufResult(result, _) = stream.write_all(response.into_bytes()).await;
    result.map_err(Error::Io)?;
    Ok(())
}

/// A decoded data frame's payload, plus whether it was the final fragment.
struct Frame {
    opcode: u8,
    payload: Bytes,
}

/// Binary-message WebSocket codec. `is_server` controls masking direction:
/// servers never mask outgoing frames and require masked incoming frames;
/// clients do the opposite.
#[derive(Debug, Clone, Copy)]
pub struct WsCodec {
    is_server: bool,
    max_len: u64,
}

impl WsCodec {
    #[must_use]
    pub fn new(is_server: bool, max_len: u64) -> Self {
        Self { is_server, max_len }
    }

    /// Write `payload` as a single unfragmented binary message.
    ///
    /// # Errors
    /// Surfaces the underlying write error.
    pub async fn write_message<S>(&self, writer: &mut S, payload: &[u8]) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let frame = self.encode_frame(OPCODE_BINARY, payload);
        let BufResult(result, _) = writer.write_all(frame).await;
        result.map_err(Error::Io)?;
        Ok(())
    }

    /// Read the next complete message, reassembling fragmentation and
    /// transparently answering pings with pongs.
    ///
    /// # Errors
    /// [`WsError::MessageTooLong`] if the assembled payload exceeds
    /// `max_len`; [`WsError::ConnectionClosed`] on a close frame; otherwise
    /// the underlying I/O error or a malformed-frame error.
    pub async fn read_message<S>(&self, stream: &mut S) -> Result<Bytes>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut assembled = BytesMut::new();
        loop {
            let (fin, frame) = self.read_frame(stream).await?;
            match frame.opcode {
                OPCODE_PING => {
                    let pong = self.encode_frame(OPCODE_PONG, &frame.payload);
                    let BufResult(result, _) = stream.write_all(pong).await;
                    result.map_err(Error::Io)?;
                    continue;
                }
                OPCODE_PONG => continue,
                OPCODE_CLOSE => return Err(Error::Ws(WsError::ConnectionClosed)),
                OPCODE_CONTINUATION | OPCODE_BINARY | OPCODE_TEXT => {
                    assembled.extend_from_slice(&frame.payload);
                    if assembled.len() as u64 > self.max_len {
                        return Err(Error::Ws(WsError::MessageTooLong));
                    }
                    if fin {
                        return Ok(assembled.freeze());
                    }
                }
                _ => return Err(Error::Ws(WsError::MalformedFrame)),
            }
        }
    }

    fn encode_frame(&self, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(payload.len() + 14);
        out.extend_from_slice(&[0x80 | opcode]); // FIN=1, single-frame messages only when sending

        let masked_bit = if self.is_server { 0x00 } else { 0x80 };
        let len = payload.len();
        if len < 126 {
            out.extend_from_slice(&[masked_bit | len as u8]);
        } else if len <= u16::MAX as usize {
            out.extend_from_slice(&[masked_bit | 126]);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.extend_from_slice(&[masked_bit | 127]);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if self.is_server {
            out.extend_from_slice(payload);
        } else {
            let mask: [u8; 4] = rand::random();
            out.extend_from_slice(&mask);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        }
        out.to_vec()
    }

    async fn read_frame<S>(&self, reader: &mut S) -> Result<(bool, Frame)>
    where
        S: AsyncRead + Unpin,
    {
        let header = vec![0u8; 2];
        let BufResult(result, header) = reader.read_exact(header).await;
        result.map_err(Error::Io)?;

        let fin = header[0] & 0x80 != 0;
        let opcode = header[0] & 0x0F;
        let masked = header[1] & 0x80 != 0;
        let len7 = header[1] & 0x7F;

        let len: u64 = match len7 {
            126 => {
                let ext = vec![0u8; 2];
                let BufResult(result, ext) = reader.read_exact(ext).await;
                result.map_err(Error::Io)?;
                u16::from_be_bytes([ext[0], ext[1]]) as u64
            }
            127 => {
                let ext = vec![0u8; 8];
                let BufResult(result, ext) = reader.read_exact(ext).await;
                result.map_err(Error::Io)?;
                u64::from_be_bytes(ext.try_into().expect("8-byte vec"))
            }
            n => n as u64,
        };

        if len > self.max_len {
            return Err(Error::Ws(WsError::MessageTooLong));
        }

        let mask = if masked {
            let mask_buf = vec![0u8; 4];
            let BufResult(result, mask_buf) = reader.read_exact(mask_buf).await;
            result.map_err(Error::Io)?;
            Some([mask_buf[0], mask_buf[1], mask_buf[2], mask_buf[3]])
        } else {
            None
        };

        let body = vec![0u8; len as usize];
        let BufResult(result, mut body) = reader.read_exact(body).await;
        result.map_err(Error::Io)?;

        if let Some(mask) = mask {
            for (i, b) in body.iter_mut().enumerate() {
                *b ^= mask[i % 4];
            }
        }

        Ok((fin, Frame { opcode, payload: Bytes::from(body) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compio::net::{TcpListener, TcpStream};

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The canonical example from RFC 6455 §1.3.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[compio::test]
    async fn handshake_then_binary_round_trip() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let request = "GET /ws HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let BufResult(result, _) = client.write_all(request.as_bytes().to_vec()).await;
        result.unwrap();

        accept_handshake(&mut server).await.unwrap();

        let server_codec = WsCodec::new(true, 4096);
        let client_codec = WsCodec::new(false, 4096);

        client_codec.write_message(&mut client, b"ping-payload").await.unwrap();
        let got = server_codec.read_message(&mut server).await.unwrap();
        assert_eq!(&got[..], b"ping-payload");

        server_codec.write_message(&mut server, b"reply-payload").await.unwrap();
        let got = client_codec.read_message(&mut client).await.unwrap();
        assert_eq!(&got[..], b"reply-payload");
    }
}
