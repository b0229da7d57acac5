// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared, reconfigurable negotiation state
//!
//! A [`NegotiationContext`] owns the current [`Snapshot`]: configuration, dictionary cache,
//! and the inverted match table, all consistent with each other. Reconfiguring builds a
//! complete new snapshot (loading any new dictionary directory into a copy of the cache)
//! and only then swaps it in, so readers never wait on disk I/O and never see a partial
//! update. Callers that already hold a snapshot keep using it until they drop it.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::config::{Config, InvertedMatchTable, PartialConfig};
use crate::dictionary::{Dictionary, DictionaryCache};
use crate::error::{ConfigLoadError, Error};

/// An immutable view of the negotiation state.
#[derive(Debug)]
pub struct Snapshot {
    config: Config,
    dictionaries: DictionaryCache,
    inverted_match_table: InvertedMatchTable,
    loaded_directory: Option<PathBuf>,
}

impl Snapshot {
    fn new(
        config: Config,
        dictionaries: DictionaryCache,
        loaded_directory: Option<PathBuf>,
    ) -> Self {
        let inverted_match_table = config.match_table.invert();
        Self {
            config,
            dictionaries,
            inverted_match_table,
            loaded_directory,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dictionaries(&self) -> &DictionaryCache {
        &self.dictionaries
    }

    pub fn inverted_match_table(&self) -> &InvertedMatchTable {
        &self.inverted_match_table
    }

    /// The directory the cache was last populated from, if any.
    pub fn loaded_directory(&self) -> Option<&Path> {
        self.loaded_directory.as_deref()
    }

    pub fn codec(&self) -> Codec {
        Codec::from_config(&self.config)
    }

    /// Looks up a dictionary by id, failing with [`Error::DictionaryNotFound`].
    pub fn dictionary(&self, id: &str) -> Result<&Arc<Dictionary>, Error> {
        self.dictionaries
            .lookup(id)
            .ok_or_else(|| Error::DictionaryNotFound { id: id.to_owned() })
    }

    /// Dictionaries the match table assigns to `url` that are held locally, in
    /// declaration order.
    pub fn candidate_ids(&self, url: &str) -> Vec<&str> {
        self.config
            .match_table
            .matching_ids(url)
            .into_iter()
            .filter(|id| self.dictionaries.contains(id))
            .collect()
    }

    /// The empty id means "no dictionary".
    fn optional_dictionary(&self, id: &str) -> Result<Option<&Arc<Dictionary>>, Error> {
        if id.is_empty() {
            Ok(None)
        } else {
            self.dictionary(id).map(Some)
        }
    }
}

/// Holds the current [`Snapshot`] and serializes updates to it.
#[derive(Debug)]
pub struct NegotiationContext {
    current: RwLock<Arc<Snapshot>>,
    reconfigure: Mutex<()>,
}

impl Default for NegotiationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationContext {
    /// Default configuration, with dictionaries from the default directory if it exists.
    pub fn new() -> Self {
        Self::starting_from(Config::default())
    }

    fn starting_from(config: Config) -> Self {
        let mut dictionaries = DictionaryCache::new();
        let loaded_directory = load_if_present(&mut dictionaries, &config.dictionary_directory);
        let snapshot = Snapshot::new(config, dictionaries, loaded_directory);
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            reconfigure: Mutex::new(()),
        }
    }

    pub fn with_config(update: PartialConfig) -> Result<Self, ConfigLoadError> {
        let context = Self::new();
        context.set(update)?;
        Ok(context)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> Config {
        self.snapshot().config.clone()
    }

    /// Applies the fields present in `update`.
    ///
    /// If `update` names a dictionary directory other than the one last loaded, that
    /// directory is scanned before anything changes. On any error the previous configuration
    /// and cache remain in effect.
    ///
    /// While no directory has been loaded, an update that doesn't name one retries the
    /// configured directory, tolerating its absence.
    pub fn set(&self, update: PartialConfig) -> Result<(), ConfigLoadError> {
        let _guard = self.reconfigure.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        let new_directory = update
            .dictionary_directory
            .as_deref()
            .filter(|dir| current.loaded_directory() != Some(*dir))
            .map(Path::to_owned);

        let mut config = current.config.clone();
        config.apply(update);
        config.validate()?;

        let (dictionaries, loaded_directory) = match (new_directory, current.loaded_directory()) {
            (Some(directory), _) => {
                let mut dictionaries = current.dictionaries.clone();
                let loaded = dictionaries.load(&directory)?;
                info!("Loaded {loaded} dictionaries from {}", directory.display());
                (dictionaries, Some(directory))
            }
            (None, None) => {
                let mut dictionaries = current.dictionaries.clone();
                let loaded_directory =
                    load_if_present(&mut dictionaries, &config.dictionary_directory);
                (dictionaries, loaded_directory)
            }
            (None, Some(_)) => (
                current.dictionaries.clone(),
                current.loaded_directory.clone(),
            ),
        };

        debug!("Applying configuration: {config:?}");
        self.replace(Snapshot::new(config, dictionaries, loaded_directory));
        Ok(())
    }

    /// Reads a JSON config file and applies it as with [`NegotiationContext::set`].
    pub fn set_from_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigLoadError> {
        let update = PartialConfig::from_json_file(path)?;
        self.set(update)
    }

    /// Rescans the configured dictionary directory.
    ///
    /// New and changed files are picked up; dictionaries whose files were removed stay cached.
    pub fn reload_dictionaries(&self) -> Result<usize, ConfigLoadError> {
        let _guard = self.reconfigure.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        let directory = current.config.dictionary_directory.clone();
        let mut dictionaries = current.dictionaries.clone();
        let loaded = dictionaries.load(&directory)?;
        info!("Reloaded {loaded} dictionaries from {}", directory.display());

        self.replace(Snapshot::new(
            current.config.clone(),
            dictionaries,
            Some(directory),
        ));
        Ok(loaded)
    }

    /// Compresses `source` into `sink` with the dictionary named `id` (or none, if `id` is
    /// empty), using the current configuration.
    pub fn compress<R: Read, W: Write>(
        &self,
        source: R,
        sink: W,
        id: &str,
    ) -> Result<u64, Error> {
        let snapshot = self.snapshot();
        let dictionary = snapshot.optional_dictionary(id)?;
        Ok(snapshot
            .codec()
            .compress(source, sink, dictionary.map(Arc::as_ref))?)
    }

    /// The inverse of [`NegotiationContext::compress`].
    pub fn decompress<R: Read, W: Write>(
        &self,
        source: R,
        sink: W,
        id: &str,
    ) -> Result<u64, Error> {
        let snapshot = self.snapshot();
        let dictionary = snapshot.optional_dictionary(id)?;
        Ok(snapshot
            .codec()
            .decompress(source, sink, dictionary.map(Arc::as_ref))?)
    }

    fn replace(&self, snapshot: Snapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }
}

/// Loads `directory` unless it doesn't exist. Failures are logged, not returned, since
/// nobody asked for this directory explicitly.
fn load_if_present(dictionaries: &mut DictionaryCache, directory: &Path) -> Option<PathBuf> {
    if !directory.is_dir() {
        info!(
            "No dictionary directory at {}; starting without dictionaries",
            directory.display()
        );
        return None;
    }
    match dictionaries.load(directory) {
        Ok(loaded) => {
            info!("Loaded {loaded} dictionaries from {}", directory.display());
            Some(directory.to_owned())
        }
        Err(err) => {
            warn!("Skipping default dictionary directory: {err}");
            None
        }
    }
}
