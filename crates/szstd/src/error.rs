// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;

use crate::body::BodyError;
use crate::codec::CodecError;
use crate::dictionary::LoadError;
use crate::headers::Encoding;

/// Type-erased error used at the HTTP seams, as `hyper` does.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while applying a configuration update.
///
/// Whenever one of these is returned, the previous configuration (and dictionary cache)
/// remains in effect untouched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("couldn't read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("couldn't parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("couldn't load dictionaries: {0}")]
    Dictionaries(#[from] LoadError),
}

/// Errors surfaced by negotiation and by the codec entry points.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    /// A dictionary was requested by id and isn't in the cache.
    #[error("dictionary {id:?} not found")]
    DictionaryNotFound { id: String },
    /// An inbound body claims a dictionary encoding whose dictionary we don't hold.
    #[error("body is {encoding}-encoded with dictionary {id:?}, which isn't available")]
    MissingDictionaryForTaggedEncoding {
        encoding: Encoding,
        id: Option<String>,
    },
    /// The preflight `HEAD` round trip failed, so the write wasn't attempted.
    #[error("preflight request failed: {0}")]
    Preflight(#[source] BoxError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("round trip failed: {0}")]
    Transport(#[source] BoxError),
}
