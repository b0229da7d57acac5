// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Negotiation header names and parsing helpers

use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, VARY};

use crate::dictionary::Dictionary;

/// Names the dictionary a body was compressed with (or that the client demands).
pub const DICTIONARY_ID: HeaderName = HeaderName::from_static("dictionary-id");

/// Repeatable; lists dictionary ids the sender holds, most preferred first.
pub const AVAILABLE_DICTIONARY: HeaderName = HeaderName::from_static("available-dictionary");

/// The two `Content-Encoding` tokens this crate speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Plain zstd, no dictionary.
    Zstd,
    /// zstd keyed by the dictionary named in `Dictionary-Id`.
    SharedZstd,
}

impl Encoding {
    pub const fn token(self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::SharedZstd => "szstd",
        }
    }

    pub fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.token())
    }

    /// The encoding to use for a body compressed with `dictionary`.
    pub fn for_dictionary(dictionary: Option<&Dictionary>) -> Self {
        match dictionary {
            Some(_) => Self::SharedZstd,
            None => Self::Zstd,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        [Self::Zstd, Self::SharedZstd]
            .into_iter()
            .find(|encoding| token.eq_ignore_ascii_case(encoding.token()))
    }

    /// Reads `Content-Encoding`, returning `None` for absent or foreign encodings.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(CONTENT_ENCODING)?.to_str().ok()?;
        Self::from_token(value.trim())
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Iterates the comma-separated items of every value of a list-valued header.
fn list_items<'a>(headers: &'a HeaderMap, name: &HeaderName) -> impl Iterator<Item = &'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Whether `Accept-Encoding` lists `encoding`, ignoring any `;q=` parameters.
pub fn accepts(headers: &HeaderMap, encoding: Encoding) -> bool {
    list_items(headers, &ACCEPT_ENCODING).any(|item| {
        let token = item.split(';').next().unwrap_or_default().trim();
        Encoding::from_token(token) == Some(encoding)
    })
}

/// The trimmed `Dictionary-Id`, if present and non-empty.
pub fn dictionary_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(DICTIONARY_ID)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// All `Available-Dictionary` ids, trimmed, in header order.
pub fn available_dictionaries(headers: &HeaderMap) -> Vec<&str> {
    list_items(headers, &AVAILABLE_DICTIONARY).collect()
}

/// Marks `headers` as describing a body compressed with `dictionary` (or with none).
pub fn set_encoding(headers: &mut HeaderMap, dictionary: Option<&Dictionary>) {
    let encoding = Encoding::for_dictionary(dictionary);
    headers.insert(CONTENT_ENCODING, encoding.header_value());
    match dictionary {
        Some(dictionary) => {
            headers.insert(DICTIONARY_ID, dictionary.header_value().clone());
        }
        None => {
            headers.remove(DICTIONARY_ID);
        }
    }
}

/// Responses vary on the request headers negotiation reads.
pub(crate) fn add_vary(headers: &mut HeaderMap) {
    headers.append(
        VARY,
        HeaderValue::from_static("Accept-Encoding, Available-Dictionary"),
    );
}
