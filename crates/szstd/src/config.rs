// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration values, partial updates, and the URL-to-dictionary match table

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;

use crate::error::ConfigLoadError;
use crate::url_match::UrlPattern;

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 5;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_DICTIONARY_DIRECTORY: &str = "./dictionaries";

/// A complete configuration. Obtain one through [`crate::NegotiationContext::config`], or
/// start from [`Config::default`] and [`Config::apply`] updates to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub compression_level: i32,
    /// Chunk size used when streaming through the codec.
    pub buffer_size: usize,
    pub dictionary_directory: PathBuf,
    /// Whether clients ask the server (with a `HEAD`) which dictionary to use before a write.
    pub preflight_writes: bool,
    /// Whether servers answer `HEAD` requests themselves, without calling the inner service.
    pub handle_head_requests: bool,
    pub match_table: MatchTable,
    /// Carried for whoever installs the `tracing` subscriber; nothing in this crate reads
    /// it, so changing it through [`crate::NegotiationContext::set`] has no effect on its own.
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            dictionary_directory: PathBuf::from(DEFAULT_DICTIONARY_DIRECTORY),
            preflight_writes: true,
            handle_head_requests: true,
            match_table: MatchTable::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Overwrites each field that `update` specifies; everything else is kept.
    pub fn apply(&mut self, update: PartialConfig) {
        let PartialConfig {
            compression_level,
            buffer_size,
            dictionary_directory,
            preflight_writes,
            handle_head_requests,
            match_table,
            log_level,
        } = update;

        if let Some(level) = compression_level {
            self.compression_level = level;
        }
        if let Some(size) = buffer_size {
            self.buffer_size = size;
        }
        if let Some(directory) = dictionary_directory {
            self.dictionary_directory = directory;
        }
        if let Some(preflight) = preflight_writes {
            self.preflight_writes = preflight;
        }
        if let Some(handle) = handle_head_requests {
            self.handle_head_requests = handle;
        }
        if let Some(table) = match_table {
            self.match_table = table;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.buffer_size == 0 {
            return Err(ConfigLoadError::Invalid {
                field: "BufferSize",
                reason: "must be greater than zero".to_owned(),
            });
        }
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.compression_level) {
            return Err(ConfigLoadError::Invalid {
                field: "CompressionLevel",
                reason: format!(
                    "{} is outside {}..={}",
                    self.compression_level,
                    levels.start(),
                    levels.end()
                ),
            });
        }
        Ok(())
    }
}

/// A configuration update. Absent fields leave the current value alone.
///
/// Deserializes from the JSON config file format, where keys are PascalCase
/// (`CompressionLevel`, `DictionaryMatchMap`, ...); snake_case keys are accepted too.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartialConfig {
    #[serde(alias = "compression_level")]
    pub compression_level: Option<i32>,
    #[serde(alias = "buffer_size")]
    pub buffer_size: Option<usize>,
    #[serde(alias = "dictionary_directory")]
    pub dictionary_directory: Option<PathBuf>,
    #[serde(alias = "preflight_writes")]
    pub preflight_writes: Option<bool>,
    #[serde(alias = "handle_head_requests")]
    pub handle_head_requests: Option<bool>,
    #[serde(rename = "DictionaryMatchMap", alias = "dictionary_match_map")]
    pub match_table: Option<MatchTable>,
    #[serde(alias = "log_level")]
    pub log_level: Option<LogLevel>,
}

impl PartialConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json_str(&contents).map_err(|source| ConfigLoadError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Fields set in `other` take precedence over fields set in `self`.
    pub fn merge(mut self, other: PartialConfig) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            compression_level,
            buffer_size,
            dictionary_directory,
            preflight_writes,
            handle_head_requests,
            match_table,
            log_level
        );
        self
    }
}

/// How much the library logs, from nothing up to negotiation decisions.
///
/// In JSON this is either a number (`0` through `4`) or a level name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "LogLevelRepr")]
pub enum LogLevel {
    #[default]
    None,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    const ALL: [Self; 5] = [Self::None, Self::Error, Self::Warn, Self::Info, Self::Debug];

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::None => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level {0:?}; expected 0-4 or one of none, error, warn, info, debug")]
pub struct UnknownLogLevel(String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(number) = s.parse::<u64>() {
            return Self::try_from(LogLevelRepr::Number(number));
        }
        Self::ALL
            .into_iter()
            .find(|level| s.eq_ignore_ascii_case(level.name()))
            .or_else(|| s.eq_ignore_ascii_case("warning").then_some(Self::Warn))
            .ok_or_else(|| UnknownLogLevel(s.to_owned()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogLevelRepr {
    Number(u64),
    Name(String),
}

impl TryFrom<LogLevelRepr> for LogLevel {
    type Error = UnknownLogLevel;

    fn try_from(repr: LogLevelRepr) -> Result<Self, UnknownLogLevel> {
        match repr {
            LogLevelRepr::Number(number) => usize::try_from(number)
                .ok()
                .and_then(|index| Self::ALL.get(index).copied())
                .ok_or_else(|| UnknownLogLevel(number.to_string())),
            LogLevelRepr::Name(name) => name.parse(),
        }
    }
}

/// One `pattern -> dictionary id` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRule {
    pub pattern: UrlPattern,
    pub dictionary_id: String,
}

/// Ordered URL-pattern to dictionary-id rules. Earlier rules win ties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchTable {
    rules: Vec<MatchRule>,
}

impl MatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pattern: impl Into<UrlPattern>, dictionary_id: impl Into<String>) {
        self.rules.push(MatchRule {
            pattern: pattern.into(),
            dictionary_id: dictionary_id.into(),
        });
    }

    pub fn with_rule(
        mut self,
        pattern: impl Into<UrlPattern>,
        dictionary_id: impl Into<String>,
    ) -> Self {
        self.push(pattern, dictionary_id);
        self
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Ids of every rule matching `url`, in declaration order, each listed once.
    pub fn matching_ids(&self, url: &str) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for rule in &self.rules {
            let id = rule.dictionary_id.as_str();
            if !ids.contains(&id) && rule.pattern.matches(url) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn invert(&self) -> InvertedMatchTable {
        let mut patterns: HashMap<String, Vec<UrlPattern>> = HashMap::new();
        for rule in &self.rules {
            patterns
                .entry(rule.dictionary_id.clone())
                .or_default()
                .push(rule.pattern.clone());
        }
        InvertedMatchTable { patterns }
    }
}

impl<P, I> FromIterator<(P, I)> for MatchTable
where
    P: Into<UrlPattern>,
    I: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (P, I)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (pattern, id) in iter {
            table.push(pattern, id);
        }
        table
    }
}

/// Accepts either `{"pattern": "id", ...}` (kept in document order) or
/// `[["pattern", "id"], ...]`.
impl<'de> Deserialize<'de> for MatchTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MatchTableVisitor;

        impl<'de> Visitor<'de> for MatchTableVisitor {
            type Value = MatchTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map or list of [pattern, dictionary id] pairs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<MatchTable, A::Error> {
                let mut table = MatchTable::new();
                while let Some((pattern, id)) = map.next_entry::<String, String>()? {
                    table.push(pattern, id);
                }
                Ok(table)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<MatchTable, A::Error> {
                let mut table = MatchTable::new();
                while let Some((pattern, id)) = seq.next_element::<(String, String)>()? {
                    table.push(pattern, id);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_any(MatchTableVisitor)
    }
}

/// `dictionary id -> patterns`, for checking whether a URL may use a given dictionary.
#[derive(Clone, Debug, Default)]
pub struct InvertedMatchTable {
    patterns: HashMap<String, Vec<UrlPattern>>,
}

impl InvertedMatchTable {
    /// Whether any pattern registered for `dictionary_id` matches `url`.
    /// Ids absent from the table are never allowed.
    pub fn allows(&self, dictionary_id: &str, url: &str) -> bool {
        self.patterns(dictionary_id)
            .iter()
            .any(|pattern| pattern.matches(url))
    }

    pub fn patterns(&self, dictionary_id: &str) -> &[UrlPattern] {
        self.patterns
            .get(dictionary_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
