//! TLS transport adapter (spec.md §4.C): wraps a connected `TcpStream` in a
//! `rustls` session, used both for "TLS immediately after connect"
//! ([`Encryption::Always`](crate::types::Encryption)) and for the in-band
//! RFC 2817 upgrade triggered mid-conversation.

use crate::error::TransportError;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout as tokio_timeout;
use tokio_rustls::rustls::{self, ClientConfig, ServerConfig};
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};

/// Installs the default crypto provider exactly once per process, the
/// `rustls` equivalent of the one-time setup spec's `init` component does
/// for signal disposition.
fn ensure_crypto_provider() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

enum Side {
    Client(client::TlsStream<TcpStream>),
    Server(server::TlsStream<TcpStream>),
}

/// A TLS-wrapped `TcpStream`, either as the client or the server side of
/// the handshake.
pub(crate) struct TlsSocket {
    side: Side,
}

impl TlsSocket {
    /// Performs the client-side handshake. `server_name` is the
    /// canonicalized host from [`crate::address::canonicalize_host`],
    /// reused as the SNI value.
    pub(crate) async fn connect(
        stream: TcpStream,
        config: Arc<ClientConfig>,
        server_name: &str,
    ) -> Result<Self, TransportError> {
        ensure_crypto_provider();
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|_| TransportError::TlsFailure(format!("invalid server name: {server_name}")))?;
        let connector = TlsConnector::from(config);
        let stream = connector
            .connect(name, stream)
            .await
            .map_err(TransportError::Io)?;
        Ok(Self {
            side: Side::Client(stream),
        })
    }

    /// Performs the server-side handshake.
    pub(crate) async fn accept(
        stream: TcpStream,
        config: Arc<ServerConfig>,
    ) -> Result<Self, TransportError> {
        ensure_crypto_provider();
        let acceptor = TlsAcceptor::from(config);
        let stream = acceptor.accept(stream).await.map_err(TransportError::Io)?;
        Ok(Self {
            side: Side::Server(stream),
        })
    }

    pub(crate) fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.side {
            Side::Client(s) => s.get_ref().0.peer_addr(),
            Side::Server(s) => s.get_ref().0.peer_addr(),
        }
    }

    #[cfg(unix)]
    pub(crate) fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        match &self.side {
            Side::Client(s) => s.get_ref().0.as_raw_fd(),
            Side::Server(s) => s.get_ref().0.as_raw_fd(),
        }
    }

    /// Waits up to `budget` for more data to become available, the TLS
    /// counterpart of [`crate::io::socket::PlainSocket::wait_readable`].
    /// Per spec.md §4.C, "TLS pending bytes count toward 'data available'
    /// regardless of socket readability", so a non-empty decrypted backlog
    /// short-circuits the wait instead of touching the socket at all.
    pub(crate) async fn wait_readable(&mut self, budget: Duration) -> Result<(), TransportError> {
        if self.pending() > 0 {
            return Ok(());
        }
        let result = match &self.side {
            Side::Client(s) => tokio_timeout(budget, s.get_ref().0.readable()).await,
            Side::Server(s) => tokio_timeout(budget, s.get_ref().0.readable()).await,
        };
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Bytes of plaintext `rustls` has already decrypted from the record
    /// layer but that haven't been delivered to a caller's `read` yet
    /// (spec.md §4.C's `pending(conn) -> bytes`).
    pub(crate) fn pending(&mut self) -> usize {
        let result = match &mut self.side {
            Side::Client(s) => s.get_mut().1.process_new_packets(),
            Side::Server(s) => s.get_mut().1.process_new_packets(),
        };
        result.map(|state| state.plaintext_bytes_to_read()).unwrap_or(0)
    }

    /// The peer's leaf certificate, DER-encoded (spec.md §4.C's
    /// `peer_credentials(conn)`). `None` before the handshake completes or
    /// when the peer presented no certificate (anonymous cipher suites,
    /// which this crate's configs don't enable, or a server that skipped
    /// client-cert verification).
    pub(crate) fn peer_certificate(&self) -> Option<Vec<u8>> {
        let chain = match &self.side {
            Side::Client(s) => s.get_ref().1.peer_certificates(),
            Side::Server(s) => s.get_ref().1.peer_certificates(),
        };
        chain.and_then(|certs| certs.first()).map(|cert| cert.as_ref().to_vec())
    }

    /// See [`crate::io::socket::PlainSocket::output_queue_depth`]: the TCP
    /// queue depth is in principle readable through the inner stream, but
    /// the TLS record layer's own write buffering on top of it is not
    /// observable without reaching into `rustls` internals, so this
    /// currently always reports `0`.
    pub(crate) fn output_queue_depth(&self) -> std::io::Result<u32> {
        Ok(0)
    }

    pub(crate) async fn shutdown(&mut self) -> Result<(), TransportError> {
        match &mut self.side {
            Side::Client(s) => s.shutdown().await,
            Side::Server(s) => s.shutdown().await,
        }
        .map_err(TransportError::Io)
    }
}

impl AsyncRead for TlsSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().side {
            Side::Client(s) => Pin::new(s).poll_read(cx, buf),
            Side::Server(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TlsSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.get_mut().side {
            Side::Client(s) => Pin::new(s).poll_write(cx, buf),
            Side::Server(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().side {
            Side::Client(s) => Pin::new(s).poll_flush(cx),
            Side::Server(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().side {
            Side::Client(s) => Pin::new(s).poll_shutdown(cx),
            Side::Server(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
