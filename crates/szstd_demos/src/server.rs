// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`Server`]: an HTTP/1 accept loop with graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::{HttpService, Service};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use szstd::error::BoxError;

/// Serves HTTP connections while allowing for graceful shutdowns.
pub struct Server {
    concurrent_connections: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Connections beyond `max_connections` get a minimal 503 and are closed.
    pub fn new(max_connections: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            concurrent_connections: Arc::new(Semaphore::new(max_connections)),
            shutdown,
        }
    }

    /// Serve `connections` with a clone of `service` each, until
    /// [`graceful_shutdown`](Self::graceful_shutdown) is called or `connections` runs dry.
    /// Resolves once every connection it started has finished.
    pub async fn serve<P, C, S, B>(&self, connections: P, service: S)
    where
        P: Stream<Item = std::io::Result<(C, SocketAddr)>>,
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        // Keeps graceful_shutdown from returning until this call is done.
        let mut shutdown_receiver = self.shutdown.subscribe();
        let mut was_shutdown = pin!(shutdown_receiver.wait_for(|&done| done).map(|_| None));

        let mut tasks = JoinSet::new();
        info!("Started serving");

        {
            let mut connections = pin!(connections);
            loop {
                let accepted = select! {
                    biased;
                    none = &mut was_shutdown => none,
                    next = connections.next() => next,
                };
                let Some(accepted) = accepted else { break };
                let (connection, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!("Couldn't accept connection: {err}");
                        continue;
                    }
                };

                let span = info_span!("connection", addr = %peer_addr);
                let Ok(permit) = self.concurrent_connections.clone().try_acquire_owned() else {
                    warn!(parent: &span, "Too overloaded; sending minimal 503.");
                    let _ = respond_with_temporarily_unavailable(connection).await;
                    continue;
                };

                let service = service.clone();
                let mut shutdown_receiver = self.shutdown.subscribe();
                let task = async move {
                    let _permit = permit;
                    info!("Connected.");
                    let wants_shutdown = shutdown_receiver.wait_for(|&done| done);
                    let http_connection =
                        http1::Builder::new().serve_connection(TokioIo::new(connection), service);
                    if let Err(err) = with_graceful_shutdown(http_connection, wants_shutdown).await
                    {
                        error!("Error serving: {err}");
                    }
                    info!("Disconnected.");
                };
                tasks.spawn(task.instrument(span));
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!("Connection task failed: {err}");
            }
        }
        info!("Stopped serving");
    }

    /// Stop accepting connections and let in-progress requests finish. Resolves once every
    /// [`serve`](Self::serve) call has returned.
    pub async fn graceful_shutdown(&self) {
        self.shutdown.send_replace(true);
        self.shutdown.closed().await;
    }
}

/// Answers an HTTP/1 connection with a 503 without reading the request.
async fn respond_with_temporarily_unavailable(
    mut connection: impl AsyncWriteExt + Unpin,
) -> std::io::Result<()> {
    let write_response = async {
        let msg = b"HTTP/1.1 503 Service Unavailable\r\n\
                    Content-Type: text/plain;charset=utf-8\r\n\
                    Content-Length: 22\r\n\
                    \r\n\
                    Too many connections!\n";
        connection.write_all(msg).await?;
        connection.shutdown().await
    };
    select! {
        result = write_response => result,
        _ = sleep(Duration::from_secs(1)) => Err(std::io::ErrorKind::TimedOut.into()),
    }
}

/// Gracefully terminate `connection` once `want_shutdown` resolves.
async fn with_graceful_shutdown<I, S, B>(
    connection: http1::Connection<I, S>,
    want_shutdown: impl Future,
) -> Result<(), hyper::Error>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + 'static,
    S: HttpService<Incoming, ResBody = B>,
    S::Error: Into<BoxError>,
    B: Body + 'static,
    B::Error: Into<BoxError>,
{
    // Polling and shutting down both need the pinned connection.
    let mut connection = pin!(connection);
    let mut want_shutdown = pin!(want_shutdown.fuse());
    std::future::poll_fn(|cx| {
        if want_shutdown.as_mut().poll(cx).is_ready() {
            connection.as_mut().graceful_shutdown();
        }
        connection.as_mut().poll(cx)
    })
    .await
}
