// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The content behind `szstd-server`: static files and an upload sink

use std::convert::Infallible;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use tracing::{info, warn};

use szstd::error::BoxError;
use szstd::response::{self, GenericResponse};

/// Serves files under `root` on GET and HEAD, and answers POST and PUT with the number of
/// (decoded) bytes received.
#[derive(Clone, Debug)]
pub struct FileService {
    root: Arc<PathBuf>,
}

impl FileService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub async fn respond<B>(self, request: Request<B>) -> Result<GenericResponse, Infallible>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let method = request.method().clone();
        let response = match method {
            Method::GET | Method::HEAD => self.read(request).await,
            Method::POST | Method::PUT => upload(request).await,
            _ => response::text(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed"),
        };
        Ok(response)
    }

    async fn read<B>(&self, request: Request<B>) -> GenericResponse {
        let Some(path) = resolve(&self.root, request.uri().path()) else {
            return response::not_found();
        };
        match tokio::fs::read(&path).await {
            Ok(_) if request.method() == Method::HEAD => Response::new(response::empty()),
            Ok(contents) => Response::new(response::full(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => response::not_found(),
            Err(err) => {
                warn!("Unable to read {}: {err}", path.display());
                response::text(StatusCode::INTERNAL_SERVER_ERROR, "unable to read file")
            }
        }
    }
}

async fn upload<B>(request: Request<B>) -> GenericResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match request.into_body().collect().await {
        Ok(collected) => {
            let received = collected.to_bytes().len();
            info!("Received {received} bytes");
            response::text(StatusCode::OK, format_args!("{received}\n"))
        }
        Err(err) => {
            let err: BoxError = err.into();
            warn!("Unable to read upload: {err}");
            response::text(StatusCode::BAD_REQUEST, err)
        }
    }
}

/// Maps a URL path onto `root`, refusing anything that would climb out of it.
fn resolve(root: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = Path::new(url_path.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    (!escapes && !relative.as_os_str().is_empty()).then(|| root.join(relative))
}
