//! Transfer framing (spec.md §4.F): chunked and length-delimited bodies, in
//! both the read and write direction.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::TransportError;
use crate::io::Transport;
use std::time::Duration;

/// The resolved length of a message body. Spec.md's original "treat
/// `2^31 - 1` as a sentinel for unknown length" is replaced here with an
/// explicit variant — see DESIGN.md's Open Question note — so the state
/// machine never confuses a real (if large) declared length with "read
/// until the peer closes."
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ContentLength {
    Known(u64),
    UntilClose,
}

/// Parses a `Content-Length` header value. Strictly decimal, no sign, no
/// leading/trailing whitespace tolerated beyond what the caller already
/// trimmed — anything else is a framing error.
pub(crate) fn parse_content_length(value: &str) -> Result<u64, TransportError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TransportError::Framing("invalid Content-Length value"));
    }
    value
        .parse::<u64>()
        .map_err(|_| TransportError::Framing("Content-Length value out of range"))
}

/// Parses a chunk-size line (hex digits, optional `;extension` ignored).
/// A negative-looking value (a leading `-`) or anything non-hex is a
/// framing error, per spec.md §4.F.
fn parse_chunk_size(line: &[u8]) -> Result<u64, TransportError> {
    let size_part = match memchr::memchr(b';', line) {
        Some(i) => &line[..i],
        None => line,
    };
    let size_part = trim_ascii(size_part);
    if size_part.is_empty() || size_part[0] == b'-' {
        return Err(TransportError::Framing("negative or empty chunk length"));
    }
    if !size_part.iter().all(|b| b.is_ascii_hexdigit()) {
        return Err(TransportError::Framing("non-hexadecimal chunk length"));
    }
    let text = std::str::from_utf8(size_part)
        .map_err(|_| TransportError::Framing("non-ASCII chunk length"))?;
    u64::from_str_radix(text, 16).map_err(|_| TransportError::Framing("chunk length out of range"))
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

enum ChunkState {
    /// Waiting for the next chunk-size line.
    AwaitingSize,
    /// Mid-chunk, `remaining` bytes of chunk data left to deliver.
    InChunk { remaining: u64 },
    /// Consumed the `0\r\n`, draining trailer lines until the blank line.
    Trailer,
    Done,
}

/// Drives the read side of either framing discipline, a fixed-length body
/// or a chunked one, pulling from the shared [`ReadBuffer`]/[`Transport`]
/// pair as needed.
pub(crate) enum BodyReader {
    None,
    Length {
        total: ContentLength,
        consumed: u64,
    },
    Chunked(ChunkState),
}

impl BodyReader {
    pub(crate) fn none() -> Self {
        BodyReader::None
    }

    pub(crate) fn for_length(total: ContentLength) -> Self {
        BodyReader::Length { total, consumed: 0 }
    }

    pub(crate) fn for_chunked() -> Self {
        BodyReader::Chunked(ChunkState::AwaitingSize)
    }

    pub(crate) fn is_done(&self) -> bool {
        match self {
            BodyReader::None => true,
            BodyReader::Length {
                total: ContentLength::Known(total),
                consumed,
            } => consumed >= total,
            BodyReader::Length {
                total: ContentLength::UntilClose,
                ..
            } => false,
            BodyReader::Chunked(ChunkState::Done) => true,
            BodyReader::Chunked(_) => false,
        }
    }

    /// How many body bytes remain known to be outstanding, if determinable
    /// (spec.md §6's `remaining_body` introspection). `None` for chunked
    /// bodies (length isn't known up front) and for `UntilClose`.
    pub(crate) fn remaining_known(&self) -> Option<u64> {
        match self {
            BodyReader::Length {
                total: ContentLength::Known(total),
                consumed,
            } => Some(total.saturating_sub(*consumed)),
            _ => None,
        }
    }

    /// Reads up to `max` bytes of body data, or fewer if that's all that's
    /// currently available/declared. Returns an empty vec exactly at the
    /// end of the body (mirrors a `0`-byte read meaning EOF).
    pub(crate) async fn read_some(
        &mut self,
        read_buf: &mut ReadBuffer,
        transport: &mut Transport,
        budget: Duration,
        max: usize,
    ) -> Result<Vec<u8>, TransportError> {
        match self {
            BodyReader::None => Ok(Vec::new()),
            BodyReader::Length { total, consumed } => {
                let want = match total {
                    ContentLength::Known(total) => {
                        let left = total.saturating_sub(*consumed);
                        if left == 0 {
                            return Ok(Vec::new());
                        }
                        left.min(max as u64) as usize
                    }
                    ContentLength::UntilClose => max,
                };

                let data = read_up_to(read_buf, transport, budget, want).await?;
                *consumed += data.len() as u64;
                Ok(data)
            }
            BodyReader::Chunked(state) => {
                read_chunked(state, read_buf, transport, budget, max).await
            }
        }
    }

    /// Positions a chunked reader inside a real chunk (or past the final
    /// `0` chunk) so that a subsequent peek reflects body bytes rather than
    /// an unread chunk-size line. A no-op for length-delimited framing,
    /// where whatever's buffered is already body data.
    pub(crate) async fn prime_for_peek(
        &mut self,
        read_buf: &mut ReadBuffer,
        transport: &mut Transport,
        budget: Duration,
    ) -> Result<(), TransportError> {
        let BodyReader::Chunked(state) = self else {
            return Ok(());
        };
        loop {
            match state {
                ChunkState::AwaitingSize => {
                    let line = read_buf.read_line(transport, budget).await?;
                    let size = parse_chunk_size(&line)?;
                    *state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::InChunk { remaining: size }
                    };
                }
                ChunkState::Trailer => {
                    let line = read_buf.read_line(transport, budget).await?;
                    if line.is_empty() {
                        *state = ChunkState::Done;
                        return Ok(());
                    }
                }
                ChunkState::InChunk { .. } | ChunkState::Done => return Ok(()),
            }
        }
    }

    /// Whether a chunked reader still sits on an unread chunk-size line (or
    /// trailer) rather than inside a chunk's body bytes — regardless of how
    /// many raw bytes happen to already be buffered, since those bytes may
    /// be framing, not body data. Drives whether `Connection::peek` needs
    /// to call `prime_for_peek` first.
    pub(crate) fn needs_priming(&self) -> bool {
        matches!(
            self,
            BodyReader::Chunked(ChunkState::AwaitingSize | ChunkState::Trailer)
        )
    }

    /// Caps how many already-buffered bytes a peek may report, so it never
    /// crosses a chunk boundary into the next chunk's size line or past a
    /// known `Content-Length`.
    pub(crate) fn peekable_len(&self, buffered: usize) -> usize {
        match self {
            BodyReader::Chunked(ChunkState::InChunk { remaining }) => {
                buffered.min(*remaining as usize)
            }
            BodyReader::Chunked(_) => 0,
            BodyReader::Length {
                total: ContentLength::Known(total),
                consumed,
            } => buffered.min(total.saturating_sub(*consumed) as usize),
            BodyReader::Length {
                total: ContentLength::UntilClose,
                ..
            } => buffered,
            BodyReader::None => 0,
        }
    }
}

/// Reads up to `want` bytes, first from whatever's already buffered, then
/// topping up from the transport. An empty result with `want > 0` means
/// the peer closed (for `UntilClose` framing, that's the normal end of
/// body rather than an error).
async fn read_up_to(
    read_buf: &mut ReadBuffer,
    transport: &mut Transport,
    budget: Duration,
    want: usize,
) -> Result<Vec<u8>, TransportError> {
    if read_buf.ready_bytes() == 0 {
        let n = read_buf.fill_more(transport, budget).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
    }
    Ok(read_buf.take_buffered(want))
}

async fn read_chunked(
    state: &mut ChunkState,
    read_buf: &mut ReadBuffer,
    transport: &mut Transport,
    budget: Duration,
    max: usize,
) -> Result<Vec<u8>, TransportError> {
    loop {
        match state {
            ChunkState::AwaitingSize => {
                let line = read_buf.read_line(transport, budget).await?;
                let size = parse_chunk_size(&line)?;
                *state = if size == 0 {
                    ChunkState::Trailer
                } else {
                    ChunkState::InChunk { remaining: size }
                };
            }
            ChunkState::InChunk { remaining } => {
                let want = (*remaining).min(max as u64) as usize;
                let data = read_up_to(read_buf, transport, budget, want).await?;
                if data.is_empty() {
                    return Err(TransportError::PeerClosed);
                }
                *remaining -= data.len() as u64;
                if *remaining == 0 {
                    // Consume the chunk's trailing CRLF.
                    let trailer = read_buf.read_line(transport, budget).await?;
                    if !trailer.is_empty() {
                        return Err(TransportError::Framing("malformed chunk terminator"));
                    }
                    *state = ChunkState::AwaitingSize;
                }
                return Ok(data);
            }
            ChunkState::Trailer => {
                let line = read_buf.read_line(transport, budget).await?;
                if line.is_empty() {
                    *state = ChunkState::Done;
                    return Ok(Vec::new());
                }
                // Trailer headers are read and discarded: this transport
                // core does not expose trailing headers to callers.
            }
            ChunkState::Done => return Ok(Vec::new()),
        }
    }
}

/// Writes one chunk (`size-in-hex\r\n<data>\r\n`) into `write_buf`. An
/// empty `data` is a no-op; use [`write_last_chunk`] to terminate the body.
pub(crate) fn write_chunk(write_buf: &mut WriteBuffer, data: &[u8]) -> Result<(), TransportError> {
    if data.is_empty() {
        return Ok(());
    }
    write_buf.push(format!("{:x}\r\n", data.len()).as_bytes())?;
    write_buf.push(data)?;
    write_buf.push(b"\r\n")
}

/// Writes the terminating `0\r\n\r\n` chunk (no trailers are ever emitted).
pub(crate) fn write_last_chunk(write_buf: &mut WriteBuffer) -> Result<(), TransportError> {
    write_buf.push(b"0\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_content_length() {
        assert_eq!(parse_content_length("1234").unwrap(), 1234);
    }

    #[test]
    fn rejects_non_numeric_content_length() {
        assert!(parse_content_length("12a4").is_err());
    }

    #[test]
    fn rejects_negative_chunk_size() {
        assert!(parse_chunk_size(b"-1").is_err());
    }

    #[test]
    fn parses_chunk_size_with_extension() {
        assert_eq!(parse_chunk_size(b"1a;foo=bar").unwrap(), 0x1a);
    }

    #[test]
    fn write_chunk_then_last_chunk_frames_correctly() {
        let mut wb = WriteBuffer::new(256);
        write_chunk(&mut wb, b"hello").unwrap();
        write_last_chunk(&mut wb).unwrap();
        // "5\r\nhello\r\n" (10 bytes) + "0\r\n\r\n" (5 bytes).
        assert_eq!(wb.pending_bytes(), 15);
    }
}
