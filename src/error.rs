//! Error taxonomy surfaced by every component of the transport core.
//!
//! Mirrors the failure table of the transport's error handling design: one
//! variant per recognizable failure class, with transient conditions
//! (`EINTR`/`EAGAIN`-equivalent) recovered locally inside [`crate::io`] and
//! [`crate::buffer`] rather than ever reaching a caller.

use std::io;

/// A failure surfaced to the caller of the transport core.
///
/// Transient conditions are never represented here: they are retried by the
/// socket/TLS layer before a [`TransportError`] is constructed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `wait_readable`'s budget expired and no timeout callback said "keep
    /// waiting" (or none was configured and the kernel reported a genuine
    /// timeout).
    #[error("timed out waiting for the peer")]
    Timeout,

    /// A zero-byte read occurred where more data was expected (`EPIPE`).
    #[error("peer closed the connection unexpectedly")]
    PeerClosed,

    /// Chunk framing or header framing is malformed: negative chunk length,
    /// missing status line, unparsable header line.
    #[error("framing error: {0}")]
    Framing(&'static str),

    /// The peer used an unsupported method or HTTP version.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// TLS handshake or in-band upgrade failed.
    #[error("TLS failure: {0}")]
    TlsFailure(String),

    /// Any other I/O failure from the socket or TLS layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A caller-supplied argument is invalid (empty/oversized field value,
    /// writing a body while in FIELDS mode, etc). Returned synchronously,
    /// without touching the socket.
    #[error("invalid argument: {0}")]
    BadArg(&'static str),

    /// Allocation failure. In practice this almost never fires under Rust's
    /// allocator (it aborts instead), but the variant is kept so that a
    /// caller driving the state machine mid-transaction can still observe
    /// "the connection is now unusable" the way spec.md requires.
    #[error("out of memory")]
    OutOfMemory,
}

impl TransportError {
    /// Whether this error leaves the connection's `State` at `ERROR`
    /// (terminal until reconnect) per the invariants in spec.md §3/§7.
    ///
    /// `Protocol` is excluded: an unsupported method/version leaves the
    /// state at `UNKNOWN_METHOD`/`UNKNOWN_VERSION` instead, with the
    /// connection still usable to send an error response. `BadArg` is
    /// excluded too: it is returned synchronously without touching the
    /// socket or the state machine at all.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TransportError::Timeout | TransportError::Protocol(_) | TransportError::BadArg(_)
        )
    }
}

impl From<tokio_rustls::rustls::Error> for TransportError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        TransportError::TlsFailure(err.to_string())
    }
}

pub(crate) type Result<T> = std::result::Result<T, TransportError>;
