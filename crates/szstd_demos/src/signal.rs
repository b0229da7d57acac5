// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown and reload signal detection
//!
//! **BEWARE:** each of these _permanently_ registers a signal handler through [`tokio`], so
//! they belong near a program's entry point.

use tokio::signal::ctrl_c;

/// Resolves on the first `SIGINT`.
pub async fn graceful_shutdown_requested() -> std::io::Result<()> {
    ctrl_c().await
}

/// Resolves on a second `SIGINT`, or on `SIGTERM`.
pub async fn fast_shutdown_requested() -> std::io::Result<()> {
    let twice = async {
        ctrl_c().await?;
        ctrl_c().await
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = twice => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    twice.await
}

/// Resolves on `SIGHUP`. Never resolves on platforms without one.
pub async fn reload_requested() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sighup = signal(SignalKind::hangup())?;
        sighup.recv().await;
        Ok(())
    }

    #[cfg(not(unix))]
    std::future::pending().await
}
