// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use tokio::net::TcpListener;
use tracing::{error, info};

use szstd::body::DecodingBody;
use szstd::NegotiatingService;
use szstd_demos::files::FileService;
use szstd_demos::server::Server;
use szstd_demos::signal::{
    fast_shutdown_requested, graceful_shutdown_requested, reload_requested,
};
use szstd_demos::NegotiationOpts;

#[derive(Debug, Parser)]
#[command(
    name = "szstd-server",
    version,
    about = "Serves a directory with dictionary-negotiated zstd compression"
)]
struct Opts {
    #[command(flatten)]
    negotiation: NegotiationOpts,

    #[arg(
        short,
        long,
        help = "Address to listen on",
        default_value = "127.0.0.1:8080",
        env = "SZSTD_LISTEN"
    )]
    listen: SocketAddr,

    #[arg(
        long,
        help = "Maximum simultaneously connected clients before connections are refused",
        default_value = "1024"
    )]
    max_clients: usize,

    #[arg(help = "Directory to serve files from", default_value = ".")]
    root: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let config = opts.negotiation.to_partial_config()?;
    szstd_demos::init_logging(config.log_level.unwrap_or_default());
    let context = NegotiationOpts::context(config)?;
    info!(
        "Loaded {} dictionaries",
        context.snapshot().dictionaries().len()
    );

    let files = FileService::new(opts.root.clone());
    let inner = service_fn(move |request: Request<DecodingBody<Incoming>>| {
        files.clone().respond(request)
    });
    let service = NegotiatingService::new(inner, context.clone());

    let listener = TcpListener::bind(opts.listen).await?;
    info!("Listening on {}", opts.listen);
    let connections = futures::stream::unfold(listener, |listener| async {
        Some((listener.accept().await, listener))
    });

    let server = Server::new(opts.max_clients);
    let run = server.serve(connections, service);

    let reload = async {
        while reload_requested().await.is_ok() {
            info!("Config reload signaled");
            match opts.negotiation.reload(&context) {
                Ok(cached) => info!("Reloaded config; {cached} dictionaries cached"),
                Err(err) => error!("Unable to reload config: {err:?}"),
            }
        }
        futures::future::pending::<()>().await
    };

    let graceful_shutdown = async {
        if let Err(err) = graceful_shutdown_requested().await {
            error!("Unable to listen for CTRL-C: {err}");
            return futures::future::pending().await;
        }
        info!("Graceful shutdown signaled");
        server.graceful_shutdown().await;
    };

    let run_until_gracefully_shutdown = async { tokio::join!(run, graceful_shutdown) };

    tokio::select! {
        _ = run_until_gracefully_shutdown => {}
        _ = reload => {}
        _ = fast_shutdown_requested() => info!("Fast shutdown requested..."),
    };

    Ok(())
}
