// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Overview
//!
//! The [`szstd`](crate) crate negotiates zstd compression with pre-shared dictionaries over
//! HTTP. Both peers keep a directory of `<id>.dict` files and a table mapping URL patterns to
//! dictionary ids; the server side ([`NegotiatingService`]) and the client side
//! ([`NegotiatingTransport`]) use request headers to agree on which dictionary (if any) a
//! body was compressed with.
//!
//! Shared state lives in a [`NegotiationContext`], which is handed to each service and
//! transport at construction. Every request works from the immutable [`Snapshot`] that was
//! current when it started, so reconfiguring never disturbs requests already in flight.
//!
//! # Protocol
//!
//! | Header | Direction | Meaning |
//! |---|---|---|
//! | `Content-Encoding` | both | `zstd` (no dictionary) or `szstd` (dictionary-keyed) |
//! | `Dictionary-Id` | both | which dictionary was used, or which one is demanded |
//! | `Accept-Encoding` | request | which of the two tokens the sender accepts in a response |
//! | `Available-Dictionary` | request | candidate dictionary ids the sender holds, preferred first |
//!
//! Before a write, a client may send a `HEAD` request with the same headers (a "preflight")
//! to learn which dictionary the server would pick for that URL, without sending the body.
//!
//! # Limitations
//!
//! The dictionary cache never evicts. Reloading a directory adds and replaces entries, but
//! dictionaries whose files were deleted stay cached until the process exits.

pub mod body;
pub mod codec;
pub mod config;
pub mod context;
pub mod dictionary;
pub mod error;
pub mod handler;
pub mod headers;
pub mod response;
pub mod transport;
pub mod url_match;

pub use codec::{Codec, CodecError};
pub use config::{Config, LogLevel, MatchTable, PartialConfig};
pub use context::{NegotiationContext, Snapshot};
pub use dictionary::{Dictionary, DictionaryCache};
pub use error::{BoxError, ConfigLoadError, Error};
pub use handler::NegotiatingService;
pub use headers::Encoding;
pub use response::BoxedBody;
pub use transport::{NegotiatingTransport, RoundTripper};
