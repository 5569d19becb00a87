//! Raw socket-option twiddling for TCP connections.
//!
//! This module uses unsafe code to access raw file descriptors/sockets for
//! TCP socket configuration. The unsafe operations are encapsulated and safe
//! to use from the public API.

#![allow(unsafe_code)]

use std::io;

/// Disable Nagle's algorithm on a compio `TcpStream`.
///
/// # Errors
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &compio::net::TcpStream) -> io::Result<()> {
    with_socket2(stream, |sock| sock.set_nodelay(true))
}

/// Set `SO_LINGER` to zero (abort on close, no lingering `FIN_WAIT`).
///
/// Used by [`crate::connection::TcpConnection::do_destroy`] so a shed
/// connection releases its socket immediately instead of occupying a
/// `TIME_WAIT` slot.
///
/// # Errors
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn set_linger_zero(stream: &compio::net::TcpStream) -> io::Result<()> {
    with_socket2(stream, |sock| sock.set_linger(Some(std::time::Duration::ZERO)))
}

/// Duplicate the underlying fd/socket so reads and writes can proceed from
/// two independently owned `TcpStream` handles — compio has no `split`, so
/// the write pump and the read loop each get their own handle onto the same
/// kernel socket, exactly as two `dup()`'d descriptors would behave.
///
/// # Errors
/// Returns an error if the descriptor cannot be duplicated.
#[cfg(unix)]
pub fn duplicate(stream: &compio::net::TcpStream) -> io::Result<compio::net::TcpStream> {
    use std::os::unix::io::{AsRawFd, FromRawFd};
    let fd = stream.as_raw_fd();
    let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
    let cloned = sock.try_clone();
    std::mem::forget(sock);
    let cloned = cloned?;
    Ok(unsafe { compio::net::TcpStream::from_raw_fd(cloned.into_raw_fd()) })
}

#[cfg(windows)]
pub fn duplicate(stream: &compio::net::TcpStream) -> io::Result<compio::net::TcpStream> {
    use std::os::windows::io::{AsRawSocket, FromRawSocket};
    let raw = stream.as_raw_socket();
    let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
    let cloned = sock.try_clone();
    std::mem::forget(sock);
    let cloned = cloned?;
    Ok(unsafe { compio::net::TcpStream::from_raw_socket(cloned.into_raw_socket()) })
}

#[cfg(unix)]
fn with_socket2(
    stream: &compio::net::TcpStream,
    f: impl FnOnce(&socket2::Socket) -> io::Result<()>,
) -> io::Result<()> {
    use std::os::unix::io::{AsRawFd, FromRawFd};
    let fd = stream.as_raw_fd();
    let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
    let result = f(&sock);
    std::mem::forget(sock); // don't close the fd
    result
}

#[cfg(windows)]
fn with_socket2(
    stream: &compio::net::TcpStream,
    f: impl FnOnce(&socket2::Socket) -> io::Result<()>,
) -> io::Result<()> {
    use std::os::windows::io::{AsRawSocket, FromRawSocket};
    let raw = stream.as_raw_socket();
    let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
    let result = f(&sock);
    std::mem::forget(sock); // don't close the socket
    result
}

#[cfg(not(any(unix, windows)))]
fn with_socket2(
    _stream: &compio::net::TcpStream,
    _f: impl FnOnce(&socket2::Socket) -> io::Result<()>,
) -> io::Result<()> {
    Ok(())
}
