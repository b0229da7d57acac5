// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use http_body_util::BodyExt;
use hyper::header::CONTENT_ENCODING;
use hyper::{Method, Request, Response, Uri};
use tracing::info;

use szstd::headers::DICTIONARY_ID;
use szstd::response::{self, BoxedBody};
use szstd_demos::NegotiationOpts;

#[derive(Debug, Parser)]
#[command(
    name = "szstd-client",
    version,
    about = "Fetches and uploads with dictionary-negotiated zstd compression"
)]
struct Opts {
    #[command(flatten)]
    negotiation: NegotiationOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download each URL in turn and write the decoded bodies to stdout.
    Get {
        #[arg(required = true)]
        urls: Vec<Uri>,
    },
    /// POST a file's contents to a URL and print the response.
    Upload {
        url: Uri,
        file: PathBuf,
        #[arg(long, help = "Use PUT instead of POST")]
        put: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let config = opts.negotiation.to_partial_config()?;
    szstd_demos::init_logging(config.log_level.unwrap_or_default());
    let context = NegotiationOpts::context(config)?;
    let client = szstd_demos::client(context);

    match opts.command {
        Command::Get { urls } => {
            for url in urls {
                let request = Request::get(url).body(response::empty())?;
                let response = client.send(request).await?;
                write_body(response).await?;
            }
        }
        Command::Upload { url, file, put } => {
            let contents = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Unable to read {}", file.display()))?;
            let method = if put { Method::PUT } else { Method::POST };
            let request = Request::builder()
                .method(method)
                .uri(url)
                .body(response::full(contents))?;
            let response = client.send(request).await?;
            write_body(response).await?;
        }
    }
    Ok(())
}

async fn write_body(response: Response<BoxedBody>) -> anyhow::Result<()> {
    let header = |name| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_owned()
    };
    info!(
        "{} (encoding {}, dictionary {})",
        response.status(),
        header(CONTENT_ENCODING),
        header(DICTIONARY_ID),
    );
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|err| anyhow!(err))?
        .to_bytes();
    std::io::stdout().write_all(&body)?;
    Ok(())
}
