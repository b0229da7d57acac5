// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pieces shared by the `szstd-server`, `szstd-client` and `szstd-report` binaries

use std::sync::Arc;

use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing_subscriber::EnvFilter;

use szstd::{BoxedBody, LogLevel, NegotiatingTransport, NegotiationContext};

pub mod files;
pub mod opts;
pub mod report;
pub mod server;
pub mod signal;

pub use opts::NegotiationOpts;

/// Install a `tracing` subscriber whose default level comes from the configured
/// [`LogLevel`]. `RUST_LOG` overrides it.
pub fn init_logging(level: LogLevel) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// A plain-HTTP client that negotiates dictionaries through `context`.
pub fn client(
    context: Arc<NegotiationContext>,
) -> NegotiatingTransport<Client<HttpConnector, BoxedBody>> {
    let client = Client::builder(TokioExecutor::new()).build_http();
    NegotiatingTransport::new(client, context)
}
