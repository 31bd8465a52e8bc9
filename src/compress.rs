//! Body compression (spec.md §4.G): a fixed codec set negotiated off
//! `Accept-Encoding`'s q-values, implemented over `flate2`.

use crate::error::TransportError;
use flate2::write::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Write;

/// The compression codecs this transport understands, a closed set
/// (spec.md §4.G) — no `br`/`zstd`, regardless of what a peer advertises.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Coding {
    Identity,
    Deflate,
    Gzip,
}

impl Coding {
    pub(crate) fn token(self) -> &'static str {
        match self {
            Coding::Identity => "identity",
            Coding::Deflate => "deflate",
            Coding::Gzip => "gzip",
        }
    }
}

/// Picks the best codec the peer's `Accept-Encoding` value and this crate
/// both support, honoring q-values (spec.md §4.G: highest q wins; ties
/// favor the earlier-listed token; `q=0` rules a token out entirely).
/// Returns `Coding::Identity` if nothing else matches or the header is
/// absent.
pub fn negotiate(accept_encoding: &str) -> Coding {
    let mut best: Option<(Coding, f32)> = None;

    for entry in accept_encoding.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (token, q) = match entry.split_once(';') {
            Some((token, params)) => (token.trim(), parse_q(params)),
            None => (entry, 1.0),
        };

        let coding = match token.to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Coding::Gzip,
            "deflate" | "x-deflate" => Coding::Deflate,
            "identity" => Coding::Identity,
            _ => continue,
        };

        if q <= 0.0 {
            continue;
        }

        match best {
            Some((_, best_q)) if best_q >= q => {}
            _ => best = Some((coding, q)),
        }
    }

    best.map(|(coding, _)| coding).unwrap_or(Coding::Identity)
}

fn parse_q(params: &str) -> f32 {
    for param in params.split(';') {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("q=") {
            return value.trim().parse::<f32>().unwrap_or(1.0);
        }
    }
    1.0
}

/// One-shot encode of a full body into the given coding. The connection's
/// state machine calls this per outgoing chunk/segment using a
/// [`Compression::fast`] level, matching the low-latency bias of an
/// interactive print protocol over a throughput-maximizing one.
pub(crate) fn encode(coding: Coding, data: &[u8]) -> Result<Vec<u8>, TransportError> {
    match coding {
        Coding::Identity => Ok(data.to_vec()),
        Coding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(data).map_err(TransportError::Io)?;
            encoder.finish().map_err(TransportError::Io)
        }
        Coding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(data).map_err(TransportError::Io)?;
            encoder.finish().map_err(TransportError::Io)
        }
    }
}

/// One-shot decode. Used on the receive side once a full compressed body
/// has been reassembled by the framing layer.
pub(crate) fn decode(coding: Coding, data: &[u8]) -> Result<Vec<u8>, TransportError> {
    match coding {
        Coding::Identity => Ok(data.to_vec()),
        Coding::Deflate => {
            let mut decoder = DeflateDecoder::new(Vec::new());
            decoder.write_all(data).map_err(|_| {
                TransportError::Framing("malformed deflate body")
            })?;
            decoder.finish().map_err(|_| TransportError::Framing("malformed deflate body"))
        }
        Coding::Gzip => {
            let mut decoder = GzDecoder::new(Vec::new());
            decoder
                .write_all(data)
                .map_err(|_| TransportError::Framing("malformed gzip body"))?;
            decoder.finish().map_err(|_| TransportError::Framing("malformed gzip body"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_highest_q_value() {
        let coding = negotiate("deflate;q=0.5, gzip;q=0.8, identity;q=0.1");
        assert_eq!(coding, Coding::Gzip);
    }

    #[test]
    fn zero_q_excludes_token() {
        let coding = negotiate("gzip;q=0, deflate");
        assert_eq!(coding, Coding::Deflate);
    }

    #[test]
    fn absent_header_is_identity() {
        assert_eq!(negotiate(""), Coding::Identity);
    }

    #[test]
    fn unsupported_token_is_skipped() {
        assert_eq!(negotiate("br, gzip"), Coding::Gzip);
    }

    #[test]
    fn x_prefixed_aliases_are_recognized() {
        assert_eq!(negotiate("x-gzip"), Coding::Gzip);
        assert_eq!(negotiate("x-deflate"), Coding::Deflate);
    }

    #[test]
    fn gzip_round_trips() {
        let original = b"hello ipp world, this is a test payload";
        let compressed = encode(Coding::Gzip, original).unwrap();
        let restored = decode(Coding::Gzip, &compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn deflate_round_trips() {
        let original = b"another payload for raw deflate";
        let compressed = encode(Coding::Deflate, original).unwrap();
        let restored = decode(Coding::Deflate, &compressed).unwrap();
        assert_eq!(restored, original);
    }
}
