//! The header field table (spec.md §3 Field Enumeration, §4.E).
//!
//! Fields are stored at known indices rather than in a general string map,
//! the same trade-off `maker_web`'s `HeaderMap` makes (`http/types.rs`) for
//! a fixed, closed vocabulary — except here each slot additionally knows
//! whether it should *append* a repeated value instead of overwriting it.

use crate::address;
use std::fmt;

/// The closed set of 42 known headers this transport recognizes by index.
/// Any other header received on the wire is ignored after syntactic
/// validation, per spec.md §3.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Field {
    AcceptLanguage = 0,
    AcceptEncoding,
    AcceptRanges,
    Accept,
    Allow,
    Authorization,
    CacheControl,
    Connection,
    ContentEncoding,
    ContentLanguage,
    ContentLength,
    ContentLocation,
    ContentMd5,
    ContentRange,
    ContentType,
    ContentVersion,
    Cookie,
    Date,
    ETag,
    Expect,
    Expires,
    Host,
    IfMatch,
    IfModifiedSince,
    IfNoneMatch,
    IfRange,
    IfUnmodifiedSince, // index 26: last of the 27 legacy-inline slots
    KeepAlive,
    LastModified,
    Link,
    Location,
    Origin,
    Range,
    Referer,
    RetryAfter,
    Server,
    SetCookie,
    TransferEncoding,
    Upgrade,
    UserAgent,
    WwwAuthenticate,
    StrictTransportSecurity, // index 41
}

/// Number of known header slots.
pub const FIELD_COUNT: usize = 42;
/// Indices `0..INLINE_COUNT` get the legacy short-inline storage
/// optimization from spec.md §4.E; the rest always heap-allocate.
const INLINE_COUNT: usize = 27;
/// Capacity of the inline slot, matching spec's "legacy short inline
/// storage" sizing (a `Date`/`Host`/short `Content-Length` line fits).
const INLINE_CAP: usize = 64;

impl Field {
    #[inline]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }

    /// The wire name of the header, matched case-insensitively on receipt.
    pub fn name(self) -> &'static str {
        match self {
            Field::AcceptLanguage => "Accept-Language",
            Field::AcceptEncoding => "Accept-Encoding",
            Field::AcceptRanges => "Accept-Ranges",
            Field::Accept => "Accept",
            Field::Allow => "Allow",
            Field::Authorization => "Authorization",
            Field::CacheControl => "Cache-Control",
            Field::Connection => "Connection",
            Field::ContentEncoding => "Content-Encoding",
            Field::ContentLanguage => "Content-Language",
            Field::ContentLength => "Content-Length",
            Field::ContentLocation => "Content-Location",
            Field::ContentMd5 => "Content-MD5",
            Field::ContentRange => "Content-Range",
            Field::ContentType => "Content-Type",
            Field::ContentVersion => "Content-Version",
            Field::Cookie => "Cookie",
            Field::Date => "Date",
            Field::ETag => "ETag",
            Field::Expect => "Expect",
            Field::Expires => "Expires",
            Field::Host => "Host",
            Field::IfMatch => "If-Match",
            Field::IfModifiedSince => "If-Modified-Since",
            Field::IfNoneMatch => "If-None-Match",
            Field::IfRange => "If-Range",
            Field::IfUnmodifiedSince => "If-Unmodified-Since",
            Field::KeepAlive => "Keep-Alive",
            Field::LastModified => "Last-Modified",
            Field::Link => "Link",
            Field::Location => "Location",
            Field::Origin => "Origin",
            Field::Range => "Range",
            Field::Referer => "Referer",
            Field::RetryAfter => "Retry-After",
            Field::Server => "Server",
            Field::SetCookie => "Set-Cookie",
            Field::TransferEncoding => "Transfer-Encoding",
            Field::Upgrade => "Upgrade",
            Field::UserAgent => "User-Agent",
            Field::WwwAuthenticate => "WWW-Authenticate",
            Field::StrictTransportSecurity => "Strict-Transport-Security",
        }
    }

    /// Looks up a known field by a wire name, case-insensitively. Returns
    /// `None` for anything outside the closed set (which is then ignored,
    /// per spec.md §3).
    pub fn from_name(name: &[u8]) -> Option<Field> {
        const ALL: [Field; FIELD_COUNT] = [
            Field::AcceptLanguage,
            Field::AcceptEncoding,
            Field::AcceptRanges,
            Field::Accept,
            Field::Allow,
            Field::Authorization,
            Field::CacheControl,
            Field::Connection,
            Field::ContentEncoding,
            Field::ContentLanguage,
            Field::ContentLength,
            Field::ContentLocation,
            Field::ContentMd5,
            Field::ContentRange,
            Field::ContentType,
            Field::ContentVersion,
            Field::Cookie,
            Field::Date,
            Field::ETag,
            Field::Expect,
            Field::Expires,
            Field::Host,
            Field::IfMatch,
            Field::IfModifiedSince,
            Field::IfNoneMatch,
            Field::IfRange,
            Field::IfUnmodifiedSince,
            Field::KeepAlive,
            Field::LastModified,
            Field::Link,
            Field::Location,
            Field::Origin,
            Field::Range,
            Field::Referer,
            Field::RetryAfter,
            Field::Server,
            Field::SetCookie,
            Field::TransferEncoding,
            Field::Upgrade,
            Field::UserAgent,
            Field::WwwAuthenticate,
            Field::StrictTransportSecurity,
        ];

        ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(
            std::str::from_utf8(name).unwrap_or(""),
        ))
    }

    /// Headers for which a second received value is appended with `", "`
    /// instead of overwriting the first (spec.md §4.E). This is the
    /// explicit inclusion set the spec calls out — `Via` and `Warning` are
    /// deliberately not part of the known-field set at all, so they fall
    /// back to being ignored entirely rather than guessed at (see
    /// DESIGN.md's "unreferenced-field append list" open question).
    #[inline]
    pub(crate) const fn appends(self) -> bool {
        matches!(
            self,
            Field::AcceptEncoding
                | Field::AcceptLanguage
                | Field::AcceptRanges
                | Field::Allow
                | Field::Link
                | Field::TransferEncoding
                | Field::Upgrade
                | Field::WwwAuthenticate
        )
    }

    /// Whether this index gets the legacy short-inline storage slot.
    #[inline]
    const fn inline_eligible(self) -> bool {
        self.index() < INLINE_COUNT
    }
}

/// A single field's storage: either inline (no allocation) or heap-backed.
#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Inline { buf: [u8; INLINE_CAP], len: u8 },
    Heap(String),
}

impl Slot {
    #[inline]
    fn as_str(&self) -> &str {
        match self {
            Slot::Empty => "",
            Slot::Inline { buf, len } => {
                std::str::from_utf8(&buf[..*len as usize]).unwrap_or("")
            }
            Slot::Heap(s) => s.as_str(),
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty) || self.as_str().is_empty()
    }
}

/// The fixed-size field table owned by a [`crate::Connection`].
#[derive(Debug, Clone)]
pub struct FieldTable {
    slots: Vec<Slot>,
    defaults: DefaultFields,
}

/// Per-connection defaults used when the caller did not set a value.
/// Only these three are defaultable, per spec.md §3.
#[derive(Debug, Clone, Default)]
struct DefaultFields {
    accept_encoding: Option<String>,
    server: Option<String>,
    user_agent: Option<String>,
}

impl Default for FieldTable {
    fn default() -> Self {
        Self {
            slots: vec![Slot::Empty; FIELD_COUNT],
            defaults: DefaultFields::default(),
        }
    }
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field outright, applying Host bracketing/trailing-dot
    /// stripping when `field == Host`. This is "receiving a first value" —
    /// for the append-aware path used while parsing incoming headers, use
    /// [`FieldTable::receive`].
    pub fn set(&mut self, field: Field, value: &str) {
        let value = if field == Field::Host {
            Self::normalize_host_header(value)
        } else {
            value.to_string()
        };
        self.slots[field.index()] = Self::store(field, &value);
    }

    /// Applies one header line received off the wire: overwrites for most
    /// fields, appends with `", "` for the subset named in
    /// [`Field::appends`] (spec.md §4.E).
    pub fn receive(&mut self, field: Field, value: &str) {
        if field.appends() && !self.slots[field.index()].is_empty() {
            let mut combined = self.slots[field.index()].as_str().to_string();
            combined.push_str(", ");
            combined.push_str(value);
            self.slots[field.index()] = Self::store(field, &combined);
            return;
        }

        self.set(field, value);
    }

    /// Reads a field's current value, falling back to the configured
    /// default for the three defaultable headers, per spec.md §3.
    pub fn get(&self, field: Field) -> &str {
        let slot = &self.slots[field.index()];
        if !slot.is_empty() {
            return slot.as_str();
        }

        match field {
            Field::AcceptEncoding => self.defaults.accept_encoding.as_deref().unwrap_or(""),
            Field::Server => self.defaults.server.as_deref().unwrap_or(""),
            Field::UserAgent => self.defaults.user_agent.as_deref().unwrap_or(""),
            _ => "",
        }
    }

    /// Whether a field currently holds a caller- or peer-supplied value
    /// (ignoring the default fallback).
    pub fn is_set(&self, field: Field) -> bool {
        !self.slots[field.index()].is_empty()
    }

    /// Sets a per-connection default for one of the three defaultable
    /// fields (spec.md §3). Setting a default for any other field is a
    /// caller error and is silently ignored, matching "only ... are
    /// defaultable."
    pub fn set_default(&mut self, field: Field, value: &str) {
        match field {
            Field::AcceptEncoding => self.defaults.accept_encoding = Some(value.to_string()),
            Field::Server => self.defaults.server = Some(value.to_string()),
            Field::UserAgent => self.defaults.user_agent = Some(value.to_string()),
            _ => {}
        }
    }

    /// Clears a single field back to its inline-empty state.
    pub fn clear(&mut self, field: Field) {
        self.slots[field.index()] = Slot::Empty;
    }

    /// Clears all fields. Idempotent: calling twice equals calling once
    /// (spec.md §8 invariant 4).
    ///
    /// On the client, re-establishes `Host` from `canonical_host` (or
    /// `"localhost"` if it starts with `/`, indicating a UNIX-domain
    /// endpoint), per spec.md §4.E.
    pub fn clear_all_for_new_request(&mut self, is_client: bool, canonical_host: &str) {
        for slot in self.slots.iter_mut() {
            *slot = Slot::Empty;
        }

        if is_client {
            let host = if canonical_host.starts_with('/') {
                "localhost"
            } else {
                canonical_host
            };
            self.set(Field::Host, host);
        }
    }

    /// Iterates fields in index order, yielding `(name, value)` pairs
    /// suitable for emission as header lines. `Host` is excluded — the
    /// state machine always writes `Host` last, per spec.md §4.H.
    ///
    /// A slot left empty by the caller falls back to [`FieldTable::get`]'s
    /// default (Accept-Encoding/Server/User-Agent), so the three
    /// defaultable fields actually reach the wire when the caller never set
    /// them explicitly, per spec.md §3.
    pub fn iter_non_empty_except_host(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != Field::Host.index())
            .filter_map(move |(i, slot)| {
                let value = if !slot.is_empty() {
                    slot.as_str()
                } else if i == Field::AcceptEncoding.index() {
                    self.defaults.accept_encoding.as_deref().unwrap_or("")
                } else if i == Field::Server.index() {
                    self.defaults.server.as_deref().unwrap_or("")
                } else if i == Field::UserAgent.index() {
                    self.defaults.user_agent.as_deref().unwrap_or("")
                } else {
                    ""
                };
                (!value.is_empty()).then(|| (field_name_by_index(i), value))
            })
    }

    fn store(field: Field, value: &str) -> Slot {
        if field.inline_eligible() && value.len() <= INLINE_CAP {
            let mut buf = [0u8; INLINE_CAP];
            buf[..value.len()].copy_from_slice(value.as_bytes());
            Slot::Inline {
                buf,
                len: value.len() as u8,
            }
        } else {
            Slot::Heap(value.to_string())
        }
    }

    /// Brackets a bare IPv6 literal and strips a trailing `.`, the `Host`
    /// special-casing from spec.md §4.E.
    fn normalize_host_header(value: &str) -> String {
        let value = value.strip_suffix('.').unwrap_or(value);
        if address::is_ipv6_literal(value) && !value.starts_with('[') {
            format!("[{value}]")
        } else {
            value.to_string()
        }
    }
}

fn field_name_by_index(index: usize) -> &'static str {
    // Safety-free: `index` always comes from `Field::index()` on a value
    // constructed from the `ALL` table in `Field::from_name`, so this is an
    // exhaustive re-derivation rather than a transmute.
    match index {
        0 => Field::AcceptLanguage.name(),
        1 => Field::AcceptEncoding.name(),
        2 => Field::AcceptRanges.name(),
        3 => Field::Accept.name(),
        4 => Field::Allow.name(),
        5 => Field::Authorization.name(),
        6 => Field::CacheControl.name(),
        7 => Field::Connection.name(),
        8 => Field::ContentEncoding.name(),
        9 => Field::ContentLanguage.name(),
        10 => Field::ContentLength.name(),
        11 => Field::ContentLocation.name(),
        12 => Field::ContentMd5.name(),
        13 => Field::ContentRange.name(),
        14 => Field::ContentType.name(),
        15 => Field::ContentVersion.name(),
        16 => Field::Cookie.name(),
        17 => Field::Date.name(),
        18 => Field::ETag.name(),
        19 => Field::Expect.name(),
        20 => Field::Expires.name(),
        21 => Field::Host.name(),
        22 => Field::IfMatch.name(),
        23 => Field::IfModifiedSince.name(),
        24 => Field::IfNoneMatch.name(),
        25 => Field::IfRange.name(),
        26 => Field::IfUnmodifiedSince.name(),
        27 => Field::KeepAlive.name(),
        28 => Field::LastModified.name(),
        29 => Field::Link.name(),
        30 => Field::Location.name(),
        31 => Field::Origin.name(),
        32 => Field::Range.name(),
        33 => Field::Referer.name(),
        34 => Field::RetryAfter.name(),
        35 => Field::Server.name(),
        36 => Field::SetCookie.name(),
        37 => Field::TransferEncoding.name(),
        38 => Field::Upgrade.name(),
        39 => Field::UserAgent.name(),
        40 => Field::WwwAuthenticate.name(),
        41 => Field::StrictTransportSecurity.name(),
        _ => unreachable!("FIELD_COUNT is 42"),
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut table = FieldTable::new();
        table.set(Field::UserAgent, "test-agent/1.0");
        assert_eq!(table.get(Field::UserAgent), "test-agent/1.0");
    }

    #[test]
    fn clear_all_is_idempotent() {
        let mut table = FieldTable::new();
        table.set(Field::Authorization, "Bearer xyz");
        table.clear_all_for_new_request(false, "");
        table.clear_all_for_new_request(false, "");
        assert_eq!(table.get(Field::Authorization), "");
    }

    #[test]
    fn appendable_header_concatenates() {
        let mut table = FieldTable::new();
        table.receive(Field::AcceptEncoding, "gzip");
        table.receive(Field::AcceptEncoding, "deflate");
        assert_eq!(table.get(Field::AcceptEncoding), "gzip, deflate");
    }

    #[test]
    fn non_appendable_header_overwrites() {
        let mut table = FieldTable::new();
        table.receive(Field::ContentType, "text/plain");
        table.receive(Field::ContentType, "application/json");
        assert_eq!(table.get(Field::ContentType), "application/json");
    }

    #[test]
    fn oversized_value_spills_to_heap_and_round_trips() {
        let mut table = FieldTable::new();
        let long = "x".repeat(200);
        table.set(Field::Authorization, &long);
        assert_eq!(table.get(Field::Authorization), long);
    }

    #[test]
    fn host_bracketed_and_dot_stripped() {
        let mut table = FieldTable::new();
        table.set(Field::Host, "2001:db8::1.");
        assert_eq!(table.get(Field::Host), "[2001:db8::1]");
    }

    #[test]
    fn defaults_are_emitted_by_header_iteration() {
        let mut table = FieldTable::new();
        table.set_default(Field::Server, "core/1.0");
        let emitted: Vec<_> = table.iter_non_empty_except_host().collect();
        assert!(emitted.contains(&("Server", "core/1.0")));
    }

    #[test]
    fn defaults_apply_only_when_unset() {
        let mut table = FieldTable::new();
        table.set_default(Field::Server, "core/1.0");
        assert_eq!(table.get(Field::Server), "core/1.0");
        table.set(Field::Server, "custom/2.0");
        assert_eq!(table.get(Field::Server), "custom/2.0");
    }
}
