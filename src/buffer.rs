//! Read/write byte buffers (spec.md §4.D): a growable read buffer with
//! CRLF line-splitting and a bounded write buffer flushed against the
//! transport's wait budget.

use crate::error::TransportError;
use crate::io::Transport;
use memchr::memchr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout as tokio_timeout;

/// Accumulates bytes read off the wire and hands back complete header
/// lines or raw body slices. Grows up to `capacity` (spec.md's "2 KiB
/// minimum, 16 KiB typical"); a line or a single `fill` that would exceed
/// it is a framing error rather than an unbounded allocation.
pub(crate) struct ReadBuffer {
    buf: Vec<u8>,
    /// Index of the first unconsumed byte.
    start: usize,
    capacity: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            start: 0,
            capacity,
        }
    }

    #[inline]
    pub(crate) fn ready_bytes(&self) -> usize {
        self.buf.len() - self.start
    }

    #[inline]
    pub(crate) fn peek(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    /// Drops `n` bytes from the front of the buffer (already handed to the
    /// caller via `peek` or `read_line`), compacting when it's fully drained.
    pub(crate) fn consume(&mut self, n: usize) {
        self.start += n;
        if self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        }
    }

    /// Reads more bytes from `transport` into the buffer, waiting up to
    /// `budget`. Returns the number of bytes appended; `0` means the peer
    /// closed the connection.
    pub(crate) async fn fill_more(
        &mut self,
        transport: &mut Transport,
        budget: Duration,
    ) -> Result<usize, TransportError> {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        if self.buf.len() >= self.capacity {
            return Err(TransportError::Framing("read buffer full before a complete line"));
        }

        transport.wait_readable(budget).await?;

        let mut scratch = vec![0u8; self.capacity - self.buf.len()];
        let n = match tokio_timeout(budget, transport.read(&mut scratch)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(TransportError::Io(e)),
            Err(_) => return Err(TransportError::Timeout),
        };
        self.buf.extend_from_slice(&scratch[..n]);
        Ok(n)
    }

    /// Reads and consumes one CRLF-terminated line (CRLF stripped),
    /// pulling more bytes from `transport` as needed. A bare `\n` without a
    /// preceding `\r` is tolerated (matching common server leniency) and
    /// still split on.
    pub(crate) async fn read_line(
        &mut self,
        transport: &mut Transport,
        budget: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(nl) = memchr(b'\n', self.peek()) {
                let line_end = if nl > 0 && self.peek()[nl - 1] == b'\r' {
                    nl - 1
                } else {
                    nl
                };
                let line = self.peek()[..line_end].to_vec();
                self.consume(nl + 1);
                return Ok(line);
            }

            if self.fill_more(transport, budget).await? == 0 {
                return Err(TransportError::PeerClosed);
            }
        }
    }

    /// Takes up to `max` bytes of already-buffered body data without
    /// touching the transport (used by chunked/length framing to drain
    /// read-ahead before issuing a fresh socket read).
    pub(crate) fn take_buffered(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.ready_bytes());
        let out = self.peek()[..n].to_vec();
        self.consume(n);
        out
    }
}

/// Accumulates bytes the caller writes before `flush_write` drains them to
/// the transport. Bounded the same way as `ReadBuffer`.
pub(crate) struct WriteBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl WriteBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub(crate) fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn push(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.buf.len() + data.len() > self.capacity {
            return Err(TransportError::BadArg("write buffer capacity exceeded"));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Drains the write buffer to `transport`, waiting up to `budget` for
    /// the whole write to complete.
    pub(crate) async fn flush_write(
        &mut self,
        transport: &mut Transport,
        budget: Duration,
    ) -> Result<(), TransportError> {
        if self.buf.is_empty() {
            return Ok(());
        }

        match tokio_timeout(budget, transport.write_all(&self.buf)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::Io(e)),
            Err(_) => return Err(TransportError::Timeout),
        }
        match tokio_timeout(budget, transport.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::Io(e)),
            Err(_) => return Err(TransportError::Timeout),
        }

        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::socket::PlainSocket;
    use tokio::net::{TcpListener, TcpStream};

    /// A connected loopback pair, used throughout the crate's tests as the
    /// in-memory substrate for exercising `Transport` without a real peer.
    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (client, accept) = tokio::join!(connect, listener.accept());
        (client.unwrap(), accept.unwrap().0)
    }

    #[tokio::test]
    async fn read_line_splits_on_crlf_across_fills() {
        let (mut client, server) = loopback_pair().await;
        let mut transport = Transport::Plain(PlainSocket::new(server));
        client.write_all(b"OPTIONS * HTTP/1.1\r\n").await.unwrap();

        let mut rb = ReadBuffer::new(4096);
        let line = rb
            .read_line(&mut transport, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, b"OPTIONS * HTTP/1.1");
    }

    #[tokio::test]
    async fn write_buffer_rejects_oversized_push() {
        let mut wb = WriteBuffer::new(4);
        assert!(wb.push(b"12345").is_err());
    }

    #[tokio::test]
    async fn flush_write_delivers_bytes_to_peer() {
        let (client, mut server) = loopback_pair().await;
        let mut transport = Transport::Plain(PlainSocket::new(client));
        let mut wb = WriteBuffer::new(4096);
        wb.push(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        wb.flush_write(&mut transport, Duration::from_secs(1))
            .await
            .unwrap();

        let mut out = [0u8; 19];
        server.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"HTTP/1.1 200 OK\r\n\r\n");
    }
}
