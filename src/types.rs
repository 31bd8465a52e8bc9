//! Core enumerations shared by the rest of the crate: methods, version,
//! connection role/state, keep-alive, and encryption mode.

use crate::error::TransportError;

/// HTTP request methods supported on the wire (spec.md §6).
///
/// `TRACE` and `CONNECT` are carried (the spec lists them as supported
/// methods for this transport, unlike `maker_web`'s own web-server scope
/// which disables them); `PATCH` is not part of this wire contract and is
/// not represented here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Get,
    Head,
    Post,
    Put,
    Delete,
    Trace,
    Connect,
}

impl Method {
    #[inline]
    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            Method::Options => b"OPTIONS",
            Method::Get => b"GET",
            Method::Head => b"HEAD",
            Method::Post => b"POST",
            Method::Put => b"PUT",
            Method::Delete => b"DELETE",
            Method::Trace => b"TRACE",
            Method::Connect => b"CONNECT",
        }
    }

    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), TransportError> {
        match src {
            _ if src.starts_with(b"OPTIONS ") => Ok((Method::Options, 7)),
            _ if src.starts_with(b"GET ") => Ok((Method::Get, 3)),
            _ if src.starts_with(b"HEAD ") => Ok((Method::Head, 4)),
            _ if src.starts_with(b"POST ") => Ok((Method::Post, 4)),
            _ if src.starts_with(b"PUT ") => Ok((Method::Put, 3)),
            _ if src.starts_with(b"DELETE ") => Ok((Method::Delete, 6)),
            _ if src.starts_with(b"TRACE ") => Ok((Method::Trace, 5)),
            _ if src.starts_with(b"CONNECT ") => Ok((Method::Connect, 7)),
            _ => Err(TransportError::Protocol("unrecognized request method")),
        }
    }
}

/// HTTP major.minor version. Only 1.0 and 1.1 are negotiated on the wire;
/// anything else is `UnsupportedVersion` per spec.md §4.H.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Default for Version {
    fn default() -> Self {
        Version::Http11
    }
}

impl Version {
    #[inline]
    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            Version::Http10 => b"HTTP/1.0",
            Version::Http11 => b"HTTP/1.1",
        }
    }

    /// Parses the version token and returns the keep-alive default that
    /// accompanies it (ON for 1.1, OFF for 1.0), per spec.md §3.
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, KeepAlive), TransportError> {
        match src {
            b"HTTP/1.1" => Ok((Version::Http11, KeepAlive::On)),
            b"HTTP/1.0" => Ok((Version::Http10, KeepAlive::Off)),
            _ => Err(TransportError::Protocol("unsupported HTTP version")),
        }
    }
}

/// Keep-alive disposition of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeepAlive {
    Off,
    On,
}

impl KeepAlive {
    #[inline]
    pub(crate) const fn is_on(self) -> bool {
        matches!(self, KeepAlive::On)
    }
}

/// Whether this `Connection` is the HTTP client or server side of the
/// conversation. Immutable after creation (spec.md §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// TLS posture of a connection (spec.md §3, §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Encryption {
    /// Refuse any TLS attempt; a server with this mode refuses to start TLS.
    Never,
    /// Leave TLS off unless the server requests it via RFC 2817 upgrade.
    IfRequested,
    /// Perform the in-band `OPTIONS *` upgrade before any real request.
    Required,
    /// TLS handshake immediately after TCP connect.
    Always,
}

/// The connection's transaction lifecycle (spec.md §3). `Waiting` is both
/// the initial and the idle state; `Error` is terminal until reconnect.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Waiting,
    Options,
    Get,
    GetSend,
    Head,
    Post,
    PostRecv,
    PostSend,
    Put,
    PutRecv,
    PutSend,
    Delete,
    Trace,
    Connect,
    Status,
    UnknownMethod,
    UnknownVersion,
    Error,
}

impl State {
    /// The state entered on the client side immediately after `send_request`
    /// for each method, per spec.md §4.H ("sets state to the operation
    /// code; for POST/PUT bumps to `*_RECV`").
    #[inline]
    pub(crate) const fn after_send(method: Method) -> State {
        match method {
            Method::Options => State::Options,
            Method::Get => State::Get,
            Method::Head => State::Head,
            Method::Post => State::PostRecv,
            Method::Put => State::PutRecv,
            Method::Delete => State::Delete,
            Method::Trace => State::Trace,
            Method::Connect => State::Connect,
        }
    }

    /// Server-side state entered after parsing a request line, per spec.md
    /// §4.H ("sets state to a method-specific value").
    #[inline]
    pub(crate) const fn after_request(method: Method) -> State {
        match method {
            Method::Options => State::Options,
            Method::Get => State::Get,
            Method::Head => State::Head,
            Method::Post => State::Post,
            Method::Put => State::Put,
            Method::Delete => State::Delete,
            Method::Trace => State::Trace,
            Method::Connect => State::Connect,
        }
    }

    /// Advances by one step the way `update()` does on the client
    /// (`GET -> GET_SEND`, `POST_RECV -> POST_SEND`, `PUT_RECV -> PUT_SEND`,
    /// else `STATUS`).
    #[inline]
    pub(crate) const fn advance_after_response(self) -> State {
        match self {
            State::Get => State::GetSend,
            State::PostRecv => State::PostSend,
            State::PutRecv => State::PutSend,
            _ => State::Status,
        }
    }
}

/// HTTP status code, restricted to the subset this transport core actually
/// emits or must recognize on the wire (100/101 continue/upgrade, the 2xx
/// a handler reports, and the 3xx/4xx/5xx band that changes framing
/// defaults per spec.md §4.F).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    pub const OK: StatusCode = StatusCode(200);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const EXPECTATION_FAILED: StatusCode = StatusCode(417);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    #[inline]
    pub const fn is_continue(self) -> bool {
        self.0 == 100
    }

    #[inline]
    pub const fn is_switching_protocols(self) -> bool {
        self.0 == 101
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 >= 300
    }

    pub(crate) fn reason_phrase(self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }
}
