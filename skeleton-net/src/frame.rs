//! Length-prefixed packetization over a byte stream.
//!
//! `Packet` computes the payload length across all input buffers and emits a
//! contiguous `[header(len)] || concat(buffers)`; `UnPacket` reads exactly
//! `header_len` bytes, decodes the length, bounds-checks it, then reads
//! exactly that many payload bytes. Header width, endianness, and bounds are
//! all configured by [`FrameOptions`].

use crate::config::{FrameOptions, HeaderLen};
use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt};

/// Stateless frame codec bound to one [`FrameOptions`].
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    options: FrameOptions,
}

impl FrameCodec {
    #[must_use]
    pub fn new(options: FrameOptions) -> Self {
        Self { options }
    }

    /// Frame `buffers` into one contiguous `[header][payload...]` buffer.
    ///
    /// # Errors
    /// `MessageTooShort`/`MessageTooLong` if the combined payload length
    /// falls outside `[min_len, max_len]`.
    pub fn packet(&self, buffers: &[&[u8]]) -> Result<Bytes, FrameError> {
        let len: u64 = buffers.iter().map(|b| b.len() as u64).sum();
        self.check_len(len)?;

        let header_len = self.options.header_len.bytes();
        let mut out = BytesMut::with_capacity(header_len + len as usize);
        self.write_header(&mut out, len);
        for b in buffers {
            out.extend_from_slice(b);
        }
        Ok(out.freeze())
    }

    fn check_len(&self, len: u64) -> Result<(), FrameError> {
        if len < self.options.min_len {
            return Err(FrameError::MessageTooShort);
        }
        if len > self.options.max_len {
            return Err(FrameError::MessageTooLong);
        }
        Ok(())
    }

    fn write_header(&self, out: &mut BytesMut, len: u64) {
        match self.options.header_len {
            HeaderLen::One => out.put_u8(len as u8),
            HeaderLen::Two => {
                if self.options.little_endian {
                    out.put_u16_le(len as u16);
                } else {
                    out.put_u16(len as u16);
                }
            }
            HeaderLen::Four => {
                if self.options.little_endian {
                    out.put_u32_le(len as u32);
                } else {
                    out.put_u32(len as u32);
                }
            }
        }
    }

    fn decode_header(&self, bytes: &[u8]) -> u64 {
        match self.options.header_len {
            HeaderLen::One => bytes[0] as u64,
            HeaderLen::Two => {
                let arr = [bytes[0], bytes[1]];
                if self.options.little_endian {
                    u16::from_le_bytes(arr) as u64
                } else {
                    u16::from_be_bytes(arr) as u64
                }
            }
            HeaderLen::Four => {
                let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
                if self.options.little_endian {
                    u32::from_le_bytes(arr) as u64
                } else {
                    u32::from_be_bytes(arr) as u64
                }
            }
        }
    }

    /// Read exactly one frame's payload from `reader`: `header_len` header
    /// bytes, then `len` payload bytes. Short reads surface the underlying
    /// I/O error (including an `UnexpectedEof` on a clean peer close).
    ///
    /// # Errors
    /// `MessageTooShort`/`MessageTooLong` if the decoded length falls
    /// outside `[min_len, max_len]`; otherwise the read's I/O error.
    pub async fn unpacket<S>(&self, reader: &mut S) -> std::io::Result<Bytes>
    where
        S: AsyncRead + Unpin,
    {
        let header_len = self.options.header_len.bytes();
        let header = vec![0u8; header_len];
        let BufResult(result, header) = reader.read_exact(header).await;
        result?;
        let len = self.decode_header(&header);

        self.check_len(len).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        let body = vec![0u8; len as usize];
        let BufResult(result, body) = reader.read_exact(body).await;
        result?;
        Ok(Bytes::from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_then_header_decodes_back_the_same_length() {
        let codec = FrameCodec::new(
            FrameOptions::default()
                .with_header_len(HeaderLen::Four)
                .with_little_endian(false)
                .with_min_len(1)
                .with_max_len(1 << 20),
        );
        let framed = codec.packet(&[b"hello"]).unwrap();
        assert_eq!(&framed[..], &[0x00, 0x00, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn packet_concatenates_multiple_buffers_under_one_header() {
        let codec = FrameCodec::new(FrameOptions::default().with_header_len(HeaderLen::Two));
        let framed = codec.packet(&[b"ab", b"cd"]).unwrap();
        assert_eq!(&framed[2..], b"abcd");
    }

    #[test]
    fn below_min_len_fails() {
        let codec = FrameCodec::new(FrameOptions::default().with_min_len(4));
        assert_eq!(codec.packet(&[b"ab"]).unwrap_err(), FrameError::MessageTooShort);
    }

    #[test]
    fn above_max_len_fails() {
        let codec = FrameCodec::new(FrameOptions::default().with_max_len(2));
        assert_eq!(codec.packet(&[b"abc"]).unwrap_err(), FrameError::MessageTooLong);
    }

    #[test]
    fn exactly_min_and_exactly_max_both_succeed() {
        let codec = FrameCodec::new(FrameOptions::default().with_min_len(2).with_max_len(2));
        assert!(codec.packet(&[b"ab"]).is_ok());
    }

    #[compio::test]
    async fn unpacket_reads_back_what_packet_wrote() {
        use compio::io::AsyncWriteExt;
        use compio::net::{TcpListener, TcpStream};

        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let codec = FrameCodec::new(FrameOptions::default().with_header_len(HeaderLen::Two));
        let framed = codec.packet(&[b"roundtrip"]).unwrap();
        client.write_all(framed.to_vec()).await.0.unwrap();

        let body = codec.unpacket(&mut server).await.unwrap();
        assert_eq!(&body[..], b"roundtrip");
    }

    #[compio::test]
    async fn unpacket_on_closed_peer_surfaces_eof() {
        use compio::net::{TcpListener, TcpStream};

        let port = portpicker::pick_unused_port().expect("no free port");
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        drop(client);

        let codec = FrameCodec::new(FrameOptions::default());
        let err = codec.unpacket(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
