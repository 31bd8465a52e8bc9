//! Resolved-address list and connect sequence (spec.md §4.A).

use crate::error::TransportError;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout as tokio_timeout;

/// An ordered, owned list of resolved socket addresses (IPv4 and IPv6
/// mixed). The connector tries them in order with a total timeout budget.
#[derive(Debug, Clone, Default)]
pub struct AddressList {
    addrs: Vec<SocketAddr>,
    /// Index of the address a previous `connect` succeeded on, if any —
    /// the "weak reference into it" from spec.md, modeled here as a plain
    /// index since the list is owned by the same `Connection`.
    selected: Option<usize>,
}

impl AddressList {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self {
            addrs,
            selected: None,
        }
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// The address the most recent successful `connect` used.
    pub fn selected(&self) -> Option<SocketAddr> {
        self.selected.and_then(|i| self.addrs.get(i).copied())
    }

    /// Attempts each address in order, honoring a total timeout budget and
    /// polling `cancel` between addresses (spec.md §4.A). Returns the
    /// connected stream and records the winning address as `selected`.
    pub async fn connect(
        &mut self,
        total_timeout: Duration,
        mut cancel: impl FnMut() -> bool,
    ) -> Result<TcpStream, TransportError> {
        if self.addrs.is_empty() {
            return Err(TransportError::BadArg("address list is empty"));
        }

        let deadline = Instant::now() + total_timeout;
        let mut last_err = None;

        for (index, addr) in self.addrs.iter().enumerate() {
            if cancel() {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "connect cancelled",
                )));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && total_timeout != Duration::ZERO {
                break;
            }

            let attempt = if total_timeout == Duration::ZERO {
                TcpStream::connect(addr).await
            } else {
                match tokio_timeout(remaining, TcpStream::connect(addr)).await {
                    Ok(result) => result,
                    Err(_) => {
                        last_err = Some(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "connect timed out",
                        ));
                        continue;
                    }
                }
            };

            match attempt {
                Ok(stream) => {
                    self.selected = Some(index);
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(TransportError::Io(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "could not connect")
        })))
    }
}

/// Canonicalizes a hostname for use as both the connect target and the
/// `Host` header, applying the two endpoint rewriting rules of spec.md
/// §4.A:
///
/// - An IPv6 link-local string beginning with `fe80::` is rewritten to
///   `[v1.<original>]`, with any zone-id `%` replaced by `+`.
/// - A plain IPv6 literal (four hex chars followed by a colon) is wrapped
///   in `[ ]`.
pub fn canonicalize_host(host: &str) -> String {
    if let Some(stripped) = host.strip_prefix("fe80::") {
        let rewritten = stripped.replace('%', "+");
        return format!("[v1.fe80::{rewritten}]");
    }

    if looks_like_bare_ipv6(host) {
        return format!("[{host}]");
    }

    host.to_string()
}

/// Four hex chars followed by a colon, the heuristic spec.md uses to spot a
/// bare (unbracketed) IPv6 literal.
fn looks_like_bare_ipv6(host: &str) -> bool {
    let bytes = host.as_bytes();
    if bytes.len() < 5 || host.starts_with('[') {
        return false;
    }
    bytes[..4].iter().all(|b| b.is_ascii_hexdigit()) && bytes[4] == b':'
}

/// Whether `host` parses as a bare IPv6 address at all (used by the field
/// table when special-casing the `Host` header).
pub fn is_ipv6_literal(host: &str) -> bool {
    host.parse::<IpAddr>()
        .map(|ip| ip.is_ipv6())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_link_local() {
        assert_eq!(
            canonicalize_host("fe80::1%eth0"),
            "[v1.fe80::1+eth0]"
        );
    }

    #[test]
    fn canonicalizes_bare_ipv6() {
        assert_eq!(canonicalize_host("2001:db8::1"), "[2001:db8::1]");
    }

    #[test]
    fn leaves_ipv4_and_names_alone() {
        assert_eq!(canonicalize_host("192.168.1.1"), "192.168.1.1");
        assert_eq!(canonicalize_host("printer.local"), "printer.local");
    }

    #[test]
    fn leaves_already_bracketed_alone() {
        assert_eq!(canonicalize_host("[2001:db8::1]"), "[2001:db8::1]");
    }
}
