//! ipp_http_core - HTTP/1.1 transport core for an IPP client/server.
//!
//! Frames, transmits, and receives HTTP/1.1 messages carrying IPP
//! requests/responses or raw document payloads, over plain or
//! TLS-protected TCP, with optional gzip/deflate body compression and an
//! in-band (RFC 2817) TLS upgrade. It does not parse IPP itself — callers
//! hand this crate opaque bytes for the body and read opaque bytes back.
//!
//! # Quick start
//!
//! ```no_run
//! use ipp_http_core::{Connection, Encryption, Method, StatusCode};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = Connection::connect_client(
//!         "printer.local",
//!         631,
//!         Encryption::IfRequested,
//!         Duration::from_secs(10),
//!         None,
//!     )
//!     .await?;
//!
//!     conn.send_request(Method::Post, "/ipp/print").await?;
//!     conn.write(b"...ipp request bytes...").await?;
//!     conn.finish_body().await?;
//!     conn.update().await?;
//!     assert_eq!(conn.status(), StatusCode::OK);
//!     let body = conn.read(4096).await?;
//!     println!("got {} response bytes", body.len());
//!     Ok(())
//! }
//! ```
//!
//! # Layout
//!
//! - [`address`] resolves DNS and canonicalizes the connect/`Host`
//!   endpoint.
//! - [`fields`] is the fixed header-field table ([`Field`], [`FieldTable`]).
//! - [`io`] wraps plain TCP and TLS in one transport surface.
//! - [`buffer`] and [`framing`] handle read/write buffering and
//!   chunked/length body framing.
//! - [`compress`] implements the `gzip`/`deflate`/`identity` codec set.
//! - [`connection`] is [`Connection`], the state machine tying the above
//!   into one request/response cycle at a time.
//! - [`limits`] holds buffer-size and timeout configuration.
//! - [`error`] is the [`TransportError`] taxonomy.

mod address;
mod buffer;
mod compress;
mod connection;
mod error;
mod fields;
mod framing;
mod io;
pub mod limits;
mod types;

pub use crate::{
    address::AddressList,
    compress::Coding,
    connection::Connection,
    error::TransportError,
    fields::{Field, FieldTable, FIELD_COUNT},
    types::{Encryption, KeepAlive, Method, Role, State, StatusCode, Version},
};
