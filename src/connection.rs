//! The connection state machine (spec.md §4.H, §6): the public surface
//! tying address resolution, socket/TLS transport, the field table,
//! framing, and compression together into one request/response cycle at a
//! time.

use crate::address::{self, AddressList};
use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::compress::{self, Coding};
use crate::error::TransportError;
use crate::fields::{Field, FieldTable};
use crate::framing::{self, BodyReader, ContentLength};
use crate::io::socket::PlainSocket;
use crate::io::tls::TlsSocket;
use crate::io::Transport;
use crate::limits::{BufferLimits, TimeoutConfig};
use crate::types::{Encryption, KeepAlive, Method, Role, State, StatusCode, Version};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio_rustls::rustls::{ClientConfig, ServerConfig};
use tracing::{debug, instrument, warn};

/// Whether the connection writes its outgoing body length-delimited or
/// chunked, decided once per request/response (spec.md §4.F).
enum BodyWriteMode {
    None,
    Length { total: u64, written: u64 },
    Chunked,
}

/// One end of an HTTP/1.x conversation: either a client talking to a
/// printer/server, or a server's per-accepted-socket handler.
pub struct Connection {
    role: Role,
    transport: Option<Transport>,
    addrs: AddressList,
    host: String,
    port: u16,

    /// Fields the caller has set to be written on the next request or
    /// response.
    fields: FieldTable,
    /// Fields most recently received from the peer. Kept separate from
    /// `fields` so that composing a server response after reading a
    /// request doesn't accidentally re-emit the request's own headers.
    recv_fields: FieldTable,
    cookie: Option<String>,
    /// Status the caller wants to see on a client `Expect: 100-continue`
    /// handshake before sending a POST/PUT body (spec.md §4.H). Cleared
    /// once consumed by `send_request`.
    expect: Option<StatusCode>,

    state: State,
    status: StatusCode,
    version: Version,
    keep_alive: KeepAlive,
    encryption: Encryption,
    timeout: TimeoutConfig,
    limits: BufferLimits,

    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    body_reader: BodyReader,
    body_writer: BodyWriteMode,
    decoded_cache: Option<VecDeque<u8>>,
    send_coding: Coding,
    recv_coding: Coding,

    activity: Instant,
    last_error: Option<String>,
    request_count: u32,
}

impl Connection {
    fn bare(role: Role, host: String, port: u16, limits: BufferLimits) -> Self {
        let mut fields = FieldTable::new();
        fields.set_default(Field::UserAgent, "ipp_http_core/0.1");
        fields.set_default(Field::Server, "ipp_http_core/0.1");
        fields.set_default(Field::AcceptEncoding, "gzip, deflate, identity");

        Self {
            role,
            transport: None,
            addrs: AddressList::default(),
            host,
            port,
            fields,
            recv_fields: FieldTable::new(),
            cookie: None,
            expect: None,
            state: State::Waiting,
            status: StatusCode::OK,
            version: Version::default(),
            keep_alive: KeepAlive::On,
            encryption: Encryption::IfRequested,
            timeout: TimeoutConfig::default(),
            read_buf: ReadBuffer::new(limits.read_capacity),
            write_buf: WriteBuffer::new(limits.write_capacity),
            body_reader: BodyReader::none(),
            body_writer: BodyWriteMode::None,
            decoded_cache: None,
            send_coding: Coding::Identity,
            recv_coding: Coding::Identity,
            limits,
            activity: Instant::now(),
            last_error: None,
            request_count: 0,
        }
    }

    /// Resolves `host:port`, connects (trying each resolved address in
    /// turn), and optionally performs the TLS handshake immediately if
    /// `encryption` is [`Encryption::Always`]. This is the client-side
    /// entry point (spec.md §4.A, §6).
    #[instrument(skip(tls_config), fields(%host, port))]
    pub async fn connect_client(
        host: &str,
        port: u16,
        encryption: Encryption,
        connect_timeout: Duration,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Result<Self, TransportError> {
        // Port 443 forces TLS from the first byte regardless of caller input
        // (spec.md §4.A).
        let encryption = if port == 443 { Encryption::Always } else { encryption };

        let canonical_host = address::canonicalize_host(host);
        let mut conn = Self::bare(Role::Client, canonical_host.clone(), port, BufferLimits::default());
        conn.encryption = encryption;

        let resolved: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(TransportError::Io)?
            .collect();
        if resolved.is_empty() {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "host resolved to no addresses",
            )));
        }
        conn.addrs = AddressList::new(resolved);

        let stream = conn.addrs.connect(connect_timeout, || false).await?;
        conn.transport = Some(Transport::Plain(PlainSocket::new(stream)));

        if encryption == Encryption::Always {
            conn.start_tls_client(tls_config.ok_or(TransportError::BadArg(
                "Encryption::Always requires a TLS client config",
            ))?)
            .await?;
        }

        conn.fields
            .clear_all_for_new_request(true, &canonical_host);
        debug!("client connected");
        Ok(conn)
    }

    /// Wraps an already-accepted socket as the server side of a
    /// conversation. `tls_config` is required when `encryption` is
    /// [`Encryption::Always`] (immediate handshake); for
    /// [`Encryption::Required`] it is instead supplied later to
    /// [`Connection::upgrade_to_tls`] when the in-band upgrade fires.
    #[instrument(skip(stream, tls_config))]
    pub async fn accept_server(
        stream: TcpStream,
        encryption: Encryption,
        tls_config: Option<Arc<ServerConfig>>,
    ) -> Result<Self, TransportError> {
        let peer = stream.peer_addr().map_err(TransportError::Io)?;
        let mut conn = Self::bare(Role::Server, peer.ip().to_string(), peer.port(), BufferLimits::default());
        conn.encryption = encryption;
        conn.transport = Some(Transport::Plain(PlainSocket::new(stream)));

        if encryption == Encryption::Always {
            let config = tls_config.ok_or(TransportError::BadArg(
                "Encryption::Always requires a TLS server config",
            ))?;
            conn.start_tls_server(config).await?;
        }

        debug!("server accepted connection");
        Ok(conn)
    }

    /// Convenience: binds and accepts one connection, for simple embedding
    /// scenarios and tests. Production servers drive their own
    /// `TcpListener` loop and call [`Connection::accept_server`] per
    /// socket.
    pub async fn listen_once(addr: SocketAddr) -> Result<(Self, SocketAddr), TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::Io)?;
        let (stream, peer) = listener.accept().await.map_err(TransportError::Io)?;
        let conn = Self::accept_server(stream, Encryption::IfRequested, None).await?;
        Ok((conn, peer))
    }

    async fn start_tls_client(&mut self, config: Arc<ClientConfig>) -> Result<(), TransportError> {
        let plain = self.take_plain_transport()?;
        let tls = TlsSocket::connect(plain, config, &self.host).await?;
        self.transport = Some(Transport::Tls(Box::new(tls)));
        Ok(())
    }

    async fn start_tls_server(&mut self, config: Arc<ServerConfig>) -> Result<(), TransportError> {
        let plain = self.take_plain_transport()?;
        let tls = TlsSocket::accept(plain, config).await?;
        self.transport = Some(Transport::Tls(Box::new(tls)));
        Ok(())
    }

    fn take_plain_transport(&mut self) -> Result<TcpStream, TransportError> {
        match self.transport.take() {
            Some(Transport::Plain(socket)) => Ok(socket.into_inner()),
            Some(other) => {
                self.transport = Some(other);
                Err(TransportError::BadArg("connection is already encrypted"))
            }
            None => Err(TransportError::BadArg("connection has no transport")),
        }
    }

    /// Performs the RFC 2817 in-band upgrade: writes `OPTIONS * HTTP/1.1`
    /// with `Upgrade: TLS/1.2` and `Connection: Upgrade`, waits for `101
    /// Switching Protocols`, then hands the stream to the TLS layer.
    /// Client-side only; a server responds to the same request via
    /// [`Connection::upgrade_to_tls`] instead.
    pub async fn request_tls_upgrade(
        &mut self,
        config: Arc<ClientConfig>,
    ) -> Result<(), TransportError> {
        if self.transport_is_encrypted() {
            return Ok(());
        }

        self.fields.set(Field::Upgrade, "TLS/1.2");
        self.fields.set(Field::Connection, "Upgrade");
        self.send_request(Method::Options, "*").await?;
        self.finish_body().await?;
        self.update().await?;

        if !self.status.is_switching_protocols() {
            return Err(TransportError::TlsFailure(
                "peer refused RFC 2817 TLS upgrade".to_string(),
            ));
        }

        self.start_tls_client(config).await
    }

    /// Server-side counterpart: called once a request with `Upgrade:
    /// TLS/1.2` has been read and the caller decides to honor it. Writes
    /// `101 Switching Protocols` itself before upgrading.
    pub async fn upgrade_to_tls(&mut self, config: Arc<ServerConfig>) -> Result<(), TransportError> {
        self.write_response(StatusCode::SWITCHING_PROTOCOLS).await?;
        self.finish_body().await?;
        self.start_tls_server(config).await
    }

    fn transport_is_encrypted(&self) -> bool {
        matches!(self.transport, Some(Transport::Tls(_)))
    }

    fn wait_budget(&self) -> Duration {
        self.timeout.wait_budget()
    }

    // ---- configuration ---------------------------------------------------

    pub fn set_blocking(&mut self, blocking: bool) {
        self.timeout.set_blocking(blocking);
    }

    pub fn set_timeout_secs(&mut self, secs: f64) {
        self.timeout.timeout_secs = secs;
    }

    pub fn set_keep_alive(&mut self, keep_alive: KeepAlive) {
        self.keep_alive = keep_alive;
    }

    pub fn set_encryption(&mut self, encryption: Encryption) {
        self.encryption = encryption;
    }

    /// Arms an `Expect: 100-continue` handshake for the next
    /// [`Connection::send_request`] carrying a body: the header is added
    /// automatically and `send_request` itself waits for the interim `100`
    /// before returning (spec.md §4.H). Consumed (reset to `None`) the
    /// moment that `send_request` call returns.
    pub fn set_expect(&mut self, status: StatusCode) {
        self.expect = Some(status);
    }

    pub fn set_field(&mut self, field: Field, value: &str) {
        self.fields.set(field, value);
    }

    /// Reads back a field the caller previously set for the next write.
    pub fn field(&self, field: Field) -> &str {
        self.fields.get(field)
    }

    /// Reads a field received from the peer on the most recent
    /// request/response.
    pub fn received_field(&self, field: Field) -> &str {
        self.recv_fields.get(field)
    }

    /// Clears the outbound field table before composing a new request or
    /// response, re-establishing `Host` for a client. Callers reusing a
    /// keep-alive connection for a second request are expected to call
    /// this before setting the next round's fields (spec.md §4.E).
    pub fn clear_fields(&mut self) {
        let host = self.fields.get(Field::Host).to_string();
        self.fields
            .clear_all_for_new_request(self.role == Role::Client, &host);
    }

    pub fn set_cookie(&mut self, cookie: &str) {
        self.cookie = Some(cookie.to_string());
        self.fields.set(Field::Cookie, cookie);
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    // ---- introspection -----------------------------------------------

    pub fn state(&self) -> State {
        self.state
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn keep_alive(&self) -> KeepAlive {
        self.keep_alive
    }

    pub fn is_encrypted(&self) -> bool {
        self.transport_is_encrypted()
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// Whether the connection is in blocking mode (spec.md §3's
    /// `blocking`/`timeout` pair) — `true` unless [`Connection::set_blocking`]
    /// turned it off.
    pub fn blocking(&self) -> bool {
        self.timeout.blocking
    }

    /// The raw socket file descriptor, for callers that need to hand it to
    /// `poll`/`select` or another fd-based API directly (spec.md §6).
    /// `-1` when there is no transport attached, or on a non-Unix target
    /// where a raw fd isn't a meaningful concept.
    #[cfg(unix)]
    pub fn fd(&self) -> std::os::unix::io::RawFd {
        self.transport.as_ref().map_or(-1, |t| t.as_raw_fd())
    }

    #[cfg(not(unix))]
    pub fn fd(&self) -> i32 {
        -1
    }

    pub fn content_length(&self) -> Option<u64> {
        self.body_reader.remaining_known()
    }

    pub fn remaining_body(&self) -> Option<u64> {
        self.body_reader.remaining_known()
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.body_reader, BodyReader::Chunked(_))
    }

    pub fn pending_write_bytes(&self) -> usize {
        self.write_buf.pending_bytes()
    }

    pub fn ready_read_bytes(&self) -> usize {
        self.read_buf.ready_bytes()
    }

    pub fn activity_time(&self) -> Instant {
        self.activity
    }

    /// Description of the last error observed on this connection, if any
    /// (spec.md §6's `last_error` introspection). Kept as rendered text
    /// rather than the error value itself, since [`TransportError`] wraps a
    /// non-`Clone` `io::Error`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn touch(&mut self) {
        self.activity = Instant::now();
    }

    /// Records `err` as the connection's last error, moves to `State::Error`
    /// if it's non-transient, and returns it unchanged for propagation.
    fn fail(&mut self, err: TransportError) -> TransportError {
        if err.is_fatal() {
            self.state = State::Error;
        }
        warn!(error = %err, "connection error");
        self.last_error = Some(err.to_string());
        err
    }

    /// Like [`Connection::fail`], but for the two request-line parse
    /// failures that leave the connection usable — an unrecognized method
    /// or version moves `state` to `UNKNOWN_METHOD`/`UNKNOWN_VERSION`
    /// instead of the generic `ERROR`, so the server can still write a
    /// `400 Bad Request` back (spec.md §4.H).
    fn fail_protocol(&mut self, err: TransportError, state: State) -> TransportError {
        self.state = state;
        warn!(error = %err, "connection error");
        self.last_error = Some(err.to_string());
        err
    }

    // ---- lifecycle ------------------------------------------------------

    /// Shuts the transport down (TCP FIN, or a TLS `close_notify`) in
    /// place, without touching any other connection state. Distinct from
    /// [`Connection::close`]: a caller that just wants to signal "no more
    /// data coming" while still inspecting whatever's already buffered
    /// calls this instead (spec.md §6).
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        match self.transport.as_mut() {
            Some(transport) => transport.shutdown().await,
            None => Ok(()),
        }
    }

    /// Shuts the transport down and resets transaction state back to
    /// `Waiting`. The address list and negotiated encryption mode survive
    /// a close so [`Connection::reconnect`] can reuse them.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.shutdown().await;
        self.transport = None;
        self.state = State::Waiting;
        self.read_buf = ReadBuffer::new(self.limits.read_capacity);
        self.write_buf = WriteBuffer::new(self.limits.write_capacity);
        self.body_reader = BodyReader::none();
        self.body_writer = BodyWriteMode::None;
        self.decoded_cache = None;
        Ok(())
    }

    /// Re-dials the same address list the original `connect_client` used.
    /// Client-only; reconnecting a server-side connection is a caller
    /// error since there is no listener to re-accept from here.
    pub async fn reconnect(
        &mut self,
        connect_timeout: Duration,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Result<(), TransportError> {
        if self.role != Role::Client {
            return Err(TransportError::BadArg("only a client connection can reconnect"));
        }
        self.close().await?;
        let stream = self.addrs.connect(connect_timeout, || false).await?;
        self.transport = Some(Transport::Plain(PlainSocket::new(stream)));
        if self.encryption == Encryption::Always {
            self.start_tls_client(tls_config.ok_or(TransportError::BadArg(
                "Encryption::Always requires a TLS client config",
            ))?)
            .await?;
        }
        self.request_count = 0;
        Ok(())
    }

    // ---- client: sending a request --------------------------------------

    /// Writes the request line and currently-set header fields, leaving
    /// the connection ready for a body (if any) via [`Connection::write`].
    pub async fn send_request(&mut self, method: Method, target: &str) -> Result<(), TransportError> {
        self.touch();
        let line = format!(
            "{} {} {}\r\n",
            std::str::from_utf8(method.as_bytes()).unwrap_or(""),
            target,
            std::str::from_utf8(self.version.as_bytes()).unwrap_or("")
        );
        self.write_buf.push(line.as_bytes())?;
        let body_expected = matches!(method, Method::Post | Method::Put);
        let wants_continue = body_expected && self.expect == Some(StatusCode::CONTINUE);
        if wants_continue {
            self.fields.set(Field::Expect, "100-continue");
        }
        self.write_header_fields(body_expected).await?;

        self.state = State::after_send(method);
        self.request_count += 1;
        self.flush_write().await?;

        self.expect = None;
        if wants_continue {
            self.read_status_line().await?;
            self.read_header_fields().await?;
            if !self.status.is_continue() {
                // The peer rejected the body outright (417 Expectation
                // Failed, or any other final status) instead of asking for
                // it — this already is the final response, so treat it
                // exactly as `update()` would rather than sending a body
                // the peer said it doesn't want.
                self.prepare_body_reader();
                self.state = self.state.advance_after_response();
            }
        }
        Ok(())
    }

    /// Emits the currently-set fields as header lines and decides the
    /// outgoing framing. `body_expected` is `true` when the method/status
    /// conventionally carries a body and no `Content-Length` was set,
    /// which enables chunked framing (spec.md §4.F); otherwise a caller
    /// who never calls [`Connection::write`] gets a bodyless message with
    /// no `Transfer-Encoding` header at all.
    async fn write_header_fields(&mut self, body_expected: bool) -> Result<(), TransportError> {
        let declared_length = self.fields.get(Field::ContentLength).to_string();
        let use_chunked = declared_length.is_empty() && body_expected;

        // Negotiated against what the *peer* most recently advertised, not
        // against our own outbound fields — a server compresses its
        // response per the request's Accept-Encoding it just read; a client
        // only compresses a request once a prior response told it the peer
        // accepts it (spec.md §4.G). Only available in chunked framing: a
        // caller who declared an explicit Content-Length already committed
        // to that many bytes on the wire, and this connection never
        // recompresses to discover the encoded size up front.
        self.send_coding = if use_chunked {
            compress::negotiate(self.recv_fields.get(Field::AcceptEncoding))
        } else {
            Coding::Identity
        };
        if self.send_coding != Coding::Identity {
            self.fields.set(Field::ContentEncoding, self.send_coding.token());
        }

        self.body_writer = if use_chunked {
            self.fields.set(Field::TransferEncoding, "chunked");
            BodyWriteMode::Chunked
        } else if declared_length.is_empty() {
            BodyWriteMode::None
        } else {
            BodyWriteMode::Length {
                total: declared_length.parse().unwrap_or(0),
                written: 0,
            }
        };

        for (name, value) in self.fields.iter_non_empty_except_host() {
            let line = format!("{name}: {value}\r\n");
            self.write_buf.push(line.as_bytes())?;
        }
        if self.role == Role::Client {
            let host_line = format!("Host: {}\r\n", self.fields.get(Field::Host));
            self.write_buf.push(host_line.as_bytes())?;
        }
        self.write_buf.push(b"\r\n")?;

        Ok(())
    }

    /// Writes body bytes, chunk-wrapping them if the content length wasn't
    /// declared up front (spec.md §4.F/§4.H).
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let encoded = if self.send_coding == Coding::Identity {
            data.to_vec()
        } else {
            compress::encode(self.send_coding, data)?
        };

        match &mut self.body_writer {
            BodyWriteMode::None => return Err(TransportError::BadArg("no body expected in this state")),
            BodyWriteMode::Length { total, written } => {
                if *written + encoded.len() as u64 > *total {
                    return Err(TransportError::BadArg("write exceeds declared Content-Length"));
                }
                *written += encoded.len() as u64;
                self.write_buf.push(&encoded)?;
            }
            BodyWriteMode::Chunked => {
                framing::write_chunk(&mut self.write_buf, &encoded)?;
            }
        }
        self.touch();
        Ok(data.len())
    }

    /// Writes formatted text as body bytes — the `std::fmt` counterpart of
    /// the traditional `printf`-style body writer. Callers build the
    /// arguments with the standard `format_args!` macro, e.g.
    /// `conn.printf(format_args!("count={}\n", n)).await?`.
    pub async fn printf(&mut self, args: std::fmt::Arguments<'_>) -> Result<usize, TransportError> {
        let text = args.to_string();
        self.write(text.as_bytes()).await
    }

    /// Reads one CRLF-terminated line straight off the wire, up to `max`
    /// bytes — the `std::io::BufRead::read_line` counterpart of the
    /// traditional `gets`. Bypasses body framing entirely, matching the
    /// original's use for multipart boundaries and other raw text embedded
    /// in a body rather than the content-length/chunk-accounted stream.
    pub async fn gets(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let budget = self.wait_budget();
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::BadArg("connection is not open"))?;
        let mut line = self
            .read_buf
            .read_line(transport, budget)
            .await
            .map_err(|e| self.fail(e))?;
        line.truncate(max);
        self.touch();
        Ok(line)
    }

    /// Finalizes the body (writes the last chunk if chunked) and flushes.
    /// Does not itself advance `state` — for a client that happens once the
    /// response is read, in [`Connection::update`].
    pub async fn finish_body(&mut self) -> Result<(), TransportError> {
        if matches!(self.body_writer, BodyWriteMode::Chunked) {
            framing::write_last_chunk(&mut self.write_buf)?;
        }
        self.body_writer = BodyWriteMode::None;
        self.flush_write().await
    }

    pub async fn flush_write(&mut self) -> Result<(), TransportError> {
        let budget = self.wait_budget();
        let result = match self.transport.as_mut() {
            Some(transport) => self.write_buf.flush_write(transport, budget).await,
            None => return Err(TransportError::BadArg("connection is not open")),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    // ---- client: reading a response --------------------------------------

    /// Reads just the status line (`HTTP/x.y nnn ...`), storing version and
    /// status. Shared between `update()`'s normal read and the client's
    /// `Expect: 100-continue` wait in `send_request` (spec.md §4.H).
    async fn read_status_line(&mut self) -> Result<(), TransportError> {
        let budget = self.wait_budget();
        let status_line = match self.transport.as_mut() {
            Some(transport) => self.read_buf.read_line(transport, budget).await,
            None => return Err(TransportError::BadArg("connection is not open")),
        };
        let status_line = status_line.map_err(|e| self.fail(e))?;

        let mut parts = status_line.splitn(3, |&b| b == b' ');
        let version_token = parts.next().unwrap_or(b"");
        let status_token = parts.next().unwrap_or(b"");
        let (version, default_keep_alive) = Version::from_bytes(version_token)
            .map_err(|e| self.fail(e))?;
        self.version = version;
        self.keep_alive = default_keep_alive;

        let status_str = std::str::from_utf8(status_token).unwrap_or("");
        let code: u16 = status_str
            .parse()
            .map_err(|_| self.fail(TransportError::Framing("unparsable status code")))?;
        self.status = StatusCode(code);
        Ok(())
    }

    /// Reads the status line and header fields of the response following a
    /// sent request, advancing `state` per spec.md §4.H. A `100 Continue`
    /// leaves `state` untouched — it's an interim response, and the caller
    /// is expected to call `update()` again once the real response lands.
    #[instrument(skip(self))]
    pub async fn update(&mut self) -> Result<(), TransportError> {
        self.read_status_line().await?;
        self.read_header_fields().await?;
        self.prepare_body_reader();
        self.touch();
        if self.status.is_continue() {
            return Ok(());
        }
        self.state = self.state.advance_after_response();
        Ok(())
    }

    async fn read_header_fields(&mut self) -> Result<(), TransportError> {
        self.recv_fields.clear_all_for_new_request(false, "");
        let budget = self.wait_budget();
        loop {
            let line = match self.transport.as_mut() {
                Some(transport) => self.read_buf.read_line(transport, budget).await,
                None => return Err(TransportError::BadArg("connection is not open")),
            };
            let line = line.map_err(|e| self.fail(e))?;
            if line.is_empty() {
                break;
            }
            let Some(colon) = memchr::memchr(b':', &line) else {
                return Err(self.fail(TransportError::Framing("header line missing ':'")));
            };
            let name = &line[..colon];
            let value = trim_ascii(&line[colon + 1..]);
            if let Some(field) = Field::from_name(name) {
                let value = std::str::from_utf8(value).unwrap_or("");
                self.recv_fields.receive(field, value);
                if field == Field::SetCookie {
                    self.cookie = Some(value.to_string());
                }
            }
        }
        Ok(())
    }

    fn prepare_body_reader(&mut self) {
        self.decoded_cache = None;
        self.recv_coding = match self.recv_fields.get(Field::ContentEncoding) {
            "gzip" => Coding::Gzip,
            "deflate" => Coding::Deflate,
            _ => Coding::Identity,
        };

        if self.recv_fields.get(Field::TransferEncoding).eq_ignore_ascii_case("chunked") {
            self.body_reader = BodyReader::for_chunked();
            return;
        }

        match self.recv_fields.get(Field::ContentLength) {
            "" => {
                let no_body_expected = matches!(self.state, State::Head)
                    || self.status.is_continue()
                    || self.status.0 == 204
                    || self.status.0 == 304;
                self.body_reader = if no_body_expected {
                    BodyReader::none()
                } else if self.keep_alive.is_on() {
                    BodyReader::for_length(ContentLength::Known(0))
                } else {
                    BodyReader::for_length(ContentLength::UntilClose)
                };
            }
            value => match framing::parse_content_length(value) {
                Ok(n) => self.body_reader = BodyReader::for_length(ContentLength::Known(n)),
                Err(_) => self.body_reader = BodyReader::for_length(ContentLength::UntilClose),
            },
        }
    }

    // ---- server: reading a request / writing a response ------------------

    /// Reads the request line and headers, preparing the body reader the
    /// same way `update` does on the client (spec.md §4.H).
    #[instrument(skip(self))]
    pub async fn read_request(&mut self) -> Result<(Method, String), TransportError> {
        let budget = self.wait_budget();
        let line = match self.transport.as_mut() {
            Some(transport) => self.read_buf.read_line(transport, budget).await,
            None => return Err(TransportError::BadArg("connection is not open")),
        };
        let line = line.map_err(|e| self.fail(e))?;

        let (method, consumed) = Method::from_bytes(&line)
            .map_err(|e| self.fail_protocol(e, State::UnknownMethod))?;
        let rest = trim_ascii(&line[consumed..]);
        let Some(space) = memchr::memchr(b' ', rest) else {
            return Err(self.fail(TransportError::Framing("malformed request line")));
        };
        let target = std::str::from_utf8(&rest[..space]).unwrap_or("").to_string();
        let version_token = trim_ascii(&rest[space + 1..]);
        let (version, default_keep_alive) = Version::from_bytes(version_token)
            .map_err(|e| self.fail_protocol(e, State::UnknownVersion))?;
        self.version = version;
        self.keep_alive = default_keep_alive;

        self.read_header_fields().await?;
        if self.recv_fields.get(Field::Connection).eq_ignore_ascii_case("close") {
            self.keep_alive = KeepAlive::Off;
        } else if self.recv_fields.get(Field::Connection).eq_ignore_ascii_case("keep-alive") {
            self.keep_alive = KeepAlive::On;
        }

        self.prepare_body_reader();
        self.state = State::after_request(method);
        self.touch();
        Ok((method, target))
    }

    /// Writes the status line and currently-set header fields, synthesizing
    /// `Date`/`Connection`/`Keep-Alive`/`Set-Cookie` and a pair of
    /// clickjacking-mitigation headers the caller didn't already set
    /// (spec.md §4.H, §6). `100 Continue`/`101 Switching Protocols` skip all
    /// of that synthesis — they're interim responses, not the final word on
    /// the transaction.
    pub async fn write_response(&mut self, status: StatusCode) -> Result<(), TransportError> {
        self.touch();
        self.status = status;
        let transitional = status.is_continue() || status.is_switching_protocols();

        if !transitional {
            if !self.fields.is_set(Field::Date) {
                let date = httpdate::fmt_http_date(std::time::SystemTime::now());
                self.fields.set(Field::Date, &date);
            }
            if !self.fields.is_set(Field::Connection) {
                let value = if self.keep_alive.is_on() { "Keep-Alive" } else { "close" };
                self.fields.set(Field::Connection, value);
            }
            if self.keep_alive.is_on() && !self.fields.is_set(Field::KeepAlive) {
                self.fields.set(Field::KeepAlive, "timeout=5, max=100");
            }
            if let Some(cookie) = self.cookie.clone() {
                if !self.fields.is_set(Field::SetCookie) {
                    let mut value = format!("{cookie}; Path=/; HttpOnly");
                    if self.transport_is_encrypted() {
                        value.push_str("; Secure");
                    }
                    self.fields.set(Field::SetCookie, &value);
                }
            }
        }

        let line = format!(
            "{} {} {}\r\n",
            std::str::from_utf8(self.version.as_bytes()).unwrap_or(""),
            status.0,
            status.reason_phrase()
        );
        self.write_buf.push(line.as_bytes())?;

        if !transitional {
            // Outside the closed 42-field set, so written as raw lines
            // rather than through FieldTable.
            self.write_buf.push(b"X-Frame-Options: DENY\r\n")?;
            self.write_buf
                .push(b"Content-Security-Policy: frame-ancestors 'none'\r\n")?;
        }

        let body_expected = !matches!(self.state, State::Head)
            && !status.is_continue()
            && !status.is_switching_protocols()
            && status.0 != 204
            && status.0 != 304;
        self.write_header_fields(body_expected).await?;
        // A 100 Continue leaves `state` alone: the server still owes the
        // real final response once it reads the body the peer was waiting
        // to send. 101 likewise — `upgrade_to_tls` drives the handshake
        // itself right after this call.
        if !transitional {
            self.state = State::Status;
        }
        self.flush_write().await
    }

    /// Sends the interim `100 Continue` a server emits after reading an
    /// `Expect: 100-continue` request header and deciding to accept the
    /// body (spec.md §4.H). Thin wrapper over `write_response` that exists
    /// mainly for the name — a caller that just wants to reject the body
    /// writes a final status (e.g. `417 Expectation Failed`) instead.
    pub async fn send_continue(&mut self) -> Result<(), TransportError> {
        self.write_response(StatusCode::CONTINUE).await
    }

    // ---- reading the body --------------------------------------------

    /// Reads up to `max` bytes of (decoded) body data. Returns an empty
    /// vec at end of body.
    pub async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        if self.recv_coding == Coding::Identity {
            let budget = self.wait_budget();
            let transport = self.transport.as_mut().ok_or(TransportError::BadArg("connection is not open"))?;
            let result = self
                .body_reader
                .read_some(&mut self.read_buf, transport, budget, max)
                .await;
            return result.map_err(|e| self.fail(e));
        }

        if self.decoded_cache.is_none() {
            let mut raw = Vec::new();
            loop {
                let budget = self.wait_budget();
                let transport = self
                    .transport
                    .as_mut()
                    .ok_or(TransportError::BadArg("connection is not open"))?;
                let chunk = self
                    .body_reader
                    .read_some(&mut self.read_buf, transport, budget, 64 * 1024)
                    .await
                    .map_err(|e| self.fail(e))?;
                if chunk.is_empty() {
                    break;
                }
                raw.extend_from_slice(&chunk);
            }
            let decoded = compress::decode(self.recv_coding, &raw).map_err(|e| self.fail(e))?;
            self.decoded_cache = Some(decoded.into());
        }

        let cache = self.decoded_cache.as_mut().unwrap();
        let n = max.min(cache.len());
        Ok(cache.drain(..n).collect())
    }

    /// Peeks at already-buffered, not-yet-decoded body bytes without
    /// consuming them. Available for any identity-coded body, chunked
    /// included — a chunked peek first primes the reader past any unread
    /// chunk-size line so the bytes returned are real body data (spec.md
    /// §4.F). Compressed bodies still return [`TransportError::BadArg`]: a
    /// peek can't decode without consuming (see DESIGN.md).
    pub async fn peek(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        if self.recv_coding != Coding::Identity {
            return Err(TransportError::BadArg(
                "peek is unavailable over compressed bodies",
            ));
        }

        if self.body_reader.needs_priming() {
            let budget = self.wait_budget();
            let transport = self
                .transport
                .as_mut()
                .ok_or(TransportError::BadArg("connection is not open"))?;
            self.body_reader
                .prime_for_peek(&mut self.read_buf, transport, budget)
                .await
                .map_err(|e| self.fail(e))?;
        }

        let available = self.read_buf.peek();
        let cap = self.body_reader.peekable_len(available.len()).min(max);
        Ok(available[..cap].to_vec())
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (client, accept) = tokio::join!(connect, listener.accept());
        (client.unwrap(), accept.unwrap().0)
    }

    #[tokio::test]
    async fn plain_get_with_length_body_round_trips() {
        let (client_stream, server_stream) = loopback_pair().await;

        let server = tokio::spawn(async move {
            let mut conn = Connection::accept_server(server_stream, Encryption::Never, None)
                .await
                .unwrap();
            let (method, target) = conn.read_request().await.unwrap();
            assert_eq!(method, Method::Get);
            assert_eq!(target, "/status");

            conn.set_field(Field::ContentLength, "5");
            conn.set_field(Field::ContentType, "text/plain");
            conn.write_response(StatusCode::OK).await.unwrap();
            conn.write(b"hello").await.unwrap();
            conn.finish_body().await.unwrap();
        });

        let mut client = Connection::bare_for_test(client_stream);
        client.send_request(Method::Get, "/status").await.unwrap();
        client.finish_body().await.unwrap();
        client.update().await.unwrap();
        assert_eq!(client.status(), StatusCode::OK);
        let body = client.read(1024).await.unwrap();
        assert_eq!(body, b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn chunked_post_round_trips() {
        let (client_stream, server_stream) = loopback_pair().await;

        let server = tokio::spawn(async move {
            let mut conn = Connection::accept_server(server_stream, Encryption::Never, None)
                .await
                .unwrap();
            let (method, _) = conn.read_request().await.unwrap();
            assert_eq!(method, Method::Post);
            let mut body = Vec::new();
            loop {
                let chunk = conn.read(4096).await.unwrap();
                if chunk.is_empty() {
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            assert_eq!(body, b"ippdataippdata");
            conn.write_response(StatusCode::OK).await.unwrap();
            conn.finish_body().await.unwrap();
        });

        let mut client = Connection::bare_for_test(client_stream);
        client.send_request(Method::Post, "/ipp/print").await.unwrap();
        client.write(b"ippdata").await.unwrap();
        client.write(b"ippdata").await.unwrap();
        client.finish_body().await.unwrap();
        client.update().await.unwrap();
        assert_eq!(client.status(), StatusCode::OK);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn negative_chunk_length_is_a_framing_error() {
        let (mut client_stream, server_stream) = loopback_pair().await;
        let mut conn = Connection::accept_server(server_stream, Encryption::Never, None)
            .await
            .unwrap();

        client_stream
            .write_all(b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n-1\r\n")
            .await
            .unwrap();

        conn.read_request().await.unwrap();
        let result = conn.read(1024).await;
        assert!(matches!(result, Err(TransportError::Framing(_))));
    }

    #[tokio::test]
    async fn expect_continue_handshake_waits_for_interim_status() {
        let (client_stream, server_stream) = loopback_pair().await;

        let server = tokio::spawn(async move {
            let mut conn = Connection::accept_server(server_stream, Encryption::Never, None)
                .await
                .unwrap();
            let (method, _) = conn.read_request().await.unwrap();
            assert_eq!(method, Method::Post);
            assert_eq!(conn.recv_fields.get(Field::Expect), "100-continue");
            conn.send_continue().await.unwrap();

            let mut body = Vec::new();
            loop {
                let chunk = conn.read(4096).await.unwrap();
                if chunk.is_empty() {
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            assert_eq!(body, b"payload");
            conn.write_response(StatusCode::OK).await.unwrap();
            conn.finish_body().await.unwrap();
        });

        let mut client = Connection::bare_for_test(client_stream);
        client.set_expect(StatusCode::CONTINUE);
        client.send_request(Method::Post, "/ipp/print").await.unwrap();
        assert_eq!(client.status(), StatusCode::CONTINUE);
        client.write(b"payload").await.unwrap();
        client.finish_body().await.unwrap();
        client.update().await.unwrap();
        assert_eq!(client.status(), StatusCode::OK);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn write_response_synthesizes_date_and_connection_headers() {
        let (mut client_stream, server_stream) = loopback_pair().await;
        let mut conn = Connection::accept_server(server_stream, Encryption::Never, None)
            .await
            .unwrap();

        client_stream
            .write_all(b"GET /status HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        conn.read_request().await.unwrap();
        conn.set_field(Field::ContentLength, "0");
        conn.write_response(StatusCode::OK).await.unwrap();
        conn.finish_body().await.unwrap();

        let mut raw = [0u8; 1024];
        let n = client_stream.read(&mut raw).await.unwrap();
        let response = String::from_utf8_lossy(&raw[..n]);
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("Date:"));
        assert!(response.contains("Connection: Keep-Alive"));
        assert!(response.contains("X-Frame-Options: DENY"));
    }

    #[tokio::test]
    async fn unrecognized_method_sets_unknown_method_state() {
        let (mut client_stream, server_stream) = loopback_pair().await;
        let mut conn = Connection::accept_server(server_stream, Encryption::Never, None)
            .await
            .unwrap();

        client_stream
            .write_all(b"FROB /x HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let result = conn.read_request().await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
        assert_eq!(conn.state(), State::UnknownMethod);
    }

    #[tokio::test]
    async fn peek_reports_buffered_chunk_body_without_consuming_it() {
        let (mut client_stream, server_stream) = loopback_pair().await;
        let mut conn = Connection::accept_server(server_stream, Encryption::Never, None)
            .await
            .unwrap();

        client_stream
            .write_all(
                b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            )
            .await
            .unwrap();
        conn.read_request().await.unwrap();

        let peeked = conn.peek(1024).await.unwrap();
        assert_eq!(peeked, b"hello");
        let read = conn.read(1024).await.unwrap();
        assert_eq!(read, b"hello");
    }

    impl Connection {
        /// Test-only constructor bypassing DNS resolution, for driving a
        /// pre-connected loopback socket as the client side.
        fn bare_for_test(stream: TcpStream) -> Connection {
            let mut conn = Connection::bare(Role::Client, "localhost".to_string(), 0, BufferLimits::default());
            conn.transport = Some(Transport::Plain(PlainSocket::new(stream)));
            conn.fields.clear_all_for_new_request(true, "localhost");
            conn
        }
    }
}
