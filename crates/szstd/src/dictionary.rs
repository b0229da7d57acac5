// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pre-shared dictionaries and the cache that holds them

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File extension identifying dictionaries on disk.
pub const DICTIONARY_EXTENSION: &str = "dict";

/// Errors that can occur while scanning a dictionary directory
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("couldn't walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("couldn't read dictionary {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A named blob used to seed the compressor and decompressor.
#[derive(Clone, Debug)]
pub struct Dictionary {
    id: String,
    header_value: HeaderValue,
    bytes: Bytes,
}

impl Dictionary {
    /// Returns `None` if `id` is empty or can't be sent as a header value.
    pub fn new(id: impl Into<String>, bytes: impl Into<Bytes>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            return None;
        }
        let header_value = HeaderValue::from_str(&id).ok()?;
        Some(Self {
            id,
            header_value,
            bytes: bytes.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The id, ready to go into a `Dictionary-Id` header.
    pub fn header_value(&self) -> &HeaderValue {
        &self.header_value
    }
}

/// Dictionaries keyed by id.
///
/// Loading only ever adds or replaces entries; nothing is evicted, even when the file a
/// dictionary came from is deleted.
#[derive(Clone, Debug, Default)]
pub struct DictionaryCache {
    entries: HashMap<String, Arc<Dictionary>>,
}

impl DictionaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache from every dictionary under `directory`.
    pub fn from_dir(directory: impl AsRef<Path>) -> Result<Self, LoadError> {
        let mut cache = Self::new();
        cache.load(directory)?;
        Ok(cache)
    }

    /// Recursively scans `directory` for `<id>.dict` files, inserting or replacing each one.
    ///
    /// Either the whole directory is loaded, or (on error) the cache is left as it was.
    /// Returns how many dictionaries were loaded.
    pub fn load(&mut self, directory: impl AsRef<Path>) -> Result<usize, LoadError> {
        let directory = directory.as_ref();
        let mut staged = Vec::new();

        for entry in WalkDir::new(directory).follow_links(true) {
            let entry = entry.map_err(|source| LoadError::Walk {
                path: directory.to_owned(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DICTIONARY_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!("Skipping dictionary with non-UTF-8 name: {path:?}");
                continue;
            };

            let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
                path: path.to_owned(),
                source,
            })?;
            match Dictionary::new(id, bytes) {
                Some(dictionary) => staged.push(dictionary),
                None => warn!("Skipping dictionary with unusable id {id:?}: {path:?}"),
            }
        }

        let loaded = staged.len();
        for dictionary in staged {
            debug!(
                "Loaded dictionary {} ({} bytes)",
                dictionary.id(),
                dictionary.bytes().len()
            );
            self.insert(dictionary);
        }
        Ok(loaded)
    }

    /// Adds `dictionary`, returning whatever it replaced.
    pub fn insert(&mut self, dictionary: Dictionary) -> Option<Arc<Dictionary>> {
        self.entries
            .insert(dictionary.id.clone(), Arc::new(dictionary))
    }

    /// Exact lookup; empty or unknown ids yield `None`.
    pub fn lookup(&self, id: &str) -> Option<&Arc<Dictionary>> {
        if id.is_empty() {
            return None;
        }
        self.entries.get(id)
    }

    /// The first of `candidates` (in the given order) that's cached.
    ///
    /// The caller decides preference; the cache only answers membership.
    pub fn find_first<I>(&self, candidates: I) -> Option<&Arc<Dictionary>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        candidates
            .into_iter()
            .find_map(|id| self.lookup(id.as_ref()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
