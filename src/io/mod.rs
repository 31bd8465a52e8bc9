//! Socket and TLS transport adapters (spec.md §4.B, §4.C).
//!
//! [`socket`] wraps a plain `TcpStream` with the wait-budget and
//! SIGPIPE-equivalent handling spec.md asks for; [`tls`] layers a
//! `rustls` session on top of the same connection for the in-band RFC
//! 2817 upgrade and "TLS from connect" modes.

pub mod socket;
pub mod tls;

use crate::error::TransportError;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Either side of the connection's transport: plain TCP, or TCP wrapped in
/// a TLS session. Both expose the same async read/write surface so
/// [`crate::connection::Connection`] does not need to branch on it (spec.md
/// §4.C: "after upgrade completes the rest of the machine is unaware
/// encryption is active").
pub(crate) enum Transport {
    Plain(socket::PlainSocket),
    Tls(Box<tls::TlsSocket>),
}

impl Transport {
    pub(crate) fn is_encrypted(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    pub(crate) fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        match self {
            Transport::Plain(s) => s.peer_addr(),
            Transport::Tls(s) => s.peer_addr(),
        }
    }

    /// Probes the kernel send buffer for bytes not yet acknowledged by the
    /// peer, used by `Connection::pending_write_bytes` (spec.md §6). TLS
    /// sessions report the underlying TCP socket's queue depth; the
    /// record-layer buffering on top of it is not observable this way and
    /// is noted as such in DESIGN.md.
    pub(crate) fn output_queue_depth(&self) -> std::io::Result<u32> {
        match self {
            Transport::Plain(s) => s.output_queue_depth(),
            Transport::Tls(s) => s.output_queue_depth(),
        }
    }

    pub(crate) async fn shutdown(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::Plain(s) => s.shutdown().await,
            Transport::Tls(s) => s.shutdown().await,
        }
    }

    /// Waits up to `budget` for more data to be available, delegating to
    /// whichever layer actually owns readiness: the raw socket for plain
    /// TCP, or the TLS adapter (which treats a buffered plaintext backlog
    /// as "available" even if the underlying socket isn't readable right
    /// now) once encrypted (spec.md §4.B/§4.C).
    pub(crate) async fn wait_readable(&mut self, budget: Duration) -> Result<(), TransportError> {
        match self {
            Transport::Plain(s) => s.wait_readable(budget).await,
            Transport::Tls(s) => s.wait_readable(budget).await,
        }
    }

    /// Bytes of decrypted-but-undelivered plaintext (spec.md §4.C
    /// `pending`). Always `0` for a plain connection.
    pub(crate) fn pending(&mut self) -> usize {
        match self {
            Transport::Plain(_) => 0,
            Transport::Tls(s) => s.pending(),
        }
    }

    /// The peer's leaf TLS certificate, if any (spec.md §4.C
    /// `peer_credentials`). Always `None` over plain TCP.
    pub(crate) fn peer_certificate(&self) -> Option<Vec<u8>> {
        match self {
            Transport::Plain(_) => None,
            Transport::Tls(s) => s.peer_certificate(),
        }
    }

    /// The raw file descriptor backing this transport, for
    /// `Connection::fd()` (spec.md §6). `-1` is never returned here — a
    /// `Transport` only exists once a socket is actually attached; the
    /// "no transport" fallback lives in `Connection::fd`.
    #[cfg(unix)]
    pub(crate) fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        match self {
            Transport::Plain(s) => s.as_raw_fd(),
            Transport::Tls(s) => s.as_raw_fd(),
        }
    }

    pub(crate) fn into_tcp_stream(self) -> Option<TcpStream> {
        match self {
            Transport::Plain(s) => Some(s.into_inner()),
            Transport::Tls(_) => None,
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s.inner_mut()).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s.inner_mut()).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s.inner_mut()).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s.inner_mut()).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
