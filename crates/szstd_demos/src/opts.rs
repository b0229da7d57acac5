// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Args};

use szstd::{LogLevel, MatchTable, NegotiationContext, PartialConfig};

/// Options every binary accepts. Flags given on the command line win over the JSON file.
#[derive(Debug, Args)]
pub struct NegotiationOpts {
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "SZSTD_CONFIG",
        help = "JSON configuration file"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_name = "DIR",
        env = "SZSTD_DICTIONARIES",
        help = "Directory scanned recursively for <id>.dict files"
    )]
    pub dictionaries: Option<PathBuf>,

    #[arg(
        short = 'm',
        long = "match",
        value_name = "PATTERN=ID",
        action = ArgAction::Append,
        value_parser = parse_match_rule,
        help = "Route URLs matching PATTERN to dictionary ID. Replaces the table from --config."
    )]
    pub match_rules: Vec<(String, String)>,

    #[arg(long, help = "zstd compression level")]
    pub level: Option<i32>,

    #[arg(long, help = "Decoder scratch buffer size in bytes")]
    pub buffer_size: Option<usize>,

    #[arg(
        long,
        help = "Pick write dictionaries locally instead of asking the server with a HEAD first"
    )]
    pub no_preflight: bool,

    #[arg(
        long,
        help = "Pass HEAD requests through to the served content instead of answering them directly"
    )]
    pub no_head_short_circuit: bool,

    #[arg(
        long,
        value_name = "LEVEL",
        help = "none, error, warn, info or debug (or 0-4)"
    )]
    pub log_level: Option<LogLevel>,
}

impl NegotiationOpts {
    /// The `--config` file (if any) with command line flags layered on top.
    pub fn to_partial_config(&self) -> anyhow::Result<PartialConfig> {
        let from_file = match &self.config {
            Some(path) => PartialConfig::from_json_file(path)?,
            None => PartialConfig::default(),
        };
        let match_table = (!self.match_rules.is_empty())
            .then(|| self.match_rules.iter().cloned().collect::<MatchTable>());
        let from_flags = PartialConfig {
            compression_level: self.level,
            buffer_size: self.buffer_size,
            dictionary_directory: self.dictionaries.clone(),
            preflight_writes: self.no_preflight.then_some(false),
            handle_head_requests: self.no_head_short_circuit.then_some(false),
            match_table,
            log_level: self.log_level,
        };
        Ok(from_file.merge(from_flags))
    }

    /// Build a context from `config`, usually the output of
    /// [`to_partial_config`](Self::to_partial_config).
    pub fn context(config: PartialConfig) -> anyhow::Result<Arc<NegotiationContext>> {
        let context =
            NegotiationContext::with_config(config).context("Unable to load configuration")?;
        Ok(Arc::new(context))
    }

    /// Reapply the config file and flags to `context`, then rescan its dictionary directory
    /// so new and changed `.dict` files are picked up. Returns how many dictionaries are
    /// cached afterwards.
    pub fn reload(&self, context: &NegotiationContext) -> anyhow::Result<usize> {
        context
            .set(self.to_partial_config()?)
            .context("Unable to apply configuration")?;
        if context.snapshot().loaded_directory().is_some() {
            context
                .reload_dictionaries()
                .context("Unable to rescan dictionaries")?;
        }
        Ok(context.snapshot().dictionaries().len())
    }
}

fn parse_match_rule(arg: &str) -> Result<(String, String), String> {
    let (pattern, id) = arg
        .rsplit_once('=')
        .ok_or_else(|| format!("expected PATTERN=ID, got {arg:?}"))?;
    if id.is_empty() {
        return Err(format!("missing dictionary id in {arg:?}"));
    }
    Ok((pattern.to_owned(), id.to_owned()))
}
