// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client side of negotiation

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{ACCEPT_ENCODING, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, Request, Response};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper_util::client::legacy::connect::Connect;
use hyper_util::client::legacy::Client;
use tracing::{debug, warn};

use crate::body::{DecodingBody, EncodingBody};
use crate::context::{NegotiationContext, Snapshot};
use crate::dictionary::Dictionary;
use crate::error::{BoxError, Error};
use crate::headers::{self, Encoding, AVAILABLE_DICTIONARY};
use crate::response::{self, BoxedBody};

/// Sends one request and yields its response.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, request: Request<BoxedBody>)
        -> Result<Response<BoxedBody>, BoxError>;
}

#[async_trait]
impl<C> RoundTripper for Client<C, BoxedBody>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn round_trip(
        &self,
        request: Request<BoxedBody>,
    ) -> Result<Response<BoxedBody>, BoxError> {
        let response = self.request(request).await?;
        Ok(response.map(response::boxed))
    }
}

#[async_trait]
impl<T> RoundTripper for Arc<T>
where
    T: RoundTripper + ?Sized,
{
    async fn round_trip(
        &self,
        request: Request<BoxedBody>,
    ) -> Result<Response<BoxedBody>, BoxError> {
        (**self).round_trip(request).await
    }
}

/// Wraps a [`RoundTripper`], advertising cached dictionaries on reads, compressing write
/// bodies, and decoding compressed responses.
///
/// `GET` and `HEAD` advertise every cached dictionary the match table assigns to the URL.
/// `POST`, `PUT` and `PATCH` compress their body, either with the first such dictionary or,
/// when [`crate::Config::preflight_writes`] is set, with whichever dictionary the server
/// names in response to a `HEAD` preflight.
#[derive(Clone, Debug)]
pub struct NegotiatingTransport<T> {
    inner: T,
    context: Arc<NegotiationContext>,
}

impl<T> NegotiatingTransport<T>
where
    T: RoundTripper,
{
    pub fn new(inner: T, context: Arc<NegotiationContext>) -> Self {
        Self { inner, context }
    }

    pub fn context(&self) -> &Arc<NegotiationContext> {
        &self.context
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub async fn send(&self, request: Request<BoxedBody>) -> Result<Response<BoxedBody>, Error> {
        let snapshot = self.context.snapshot();
        let method = request.method().clone();
        match method {
            Method::GET | Method::HEAD => self.read(&snapshot, request).await,
            Method::POST | Method::PUT | Method::PATCH => self.write(&snapshot, request).await,
            _ => self.forward(request).await,
        }
    }

    async fn forward(&self, request: Request<BoxedBody>) -> Result<Response<BoxedBody>, Error> {
        self.inner.round_trip(request).await.map_err(Error::Transport)
    }

    async fn read(
        &self,
        snapshot: &Snapshot,
        mut request: Request<BoxedBody>,
    ) -> Result<Response<BoxedBody>, Error> {
        let url = effective_url(&request);
        let candidates = held_candidates(snapshot, &url);
        debug!(
            "Advertising {} dictionaries for {} {url}",
            candidates.len(),
            request.method()
        );
        advertise(request.headers_mut(), &candidates);
        let response = self.forward(request).await?;
        decode_response(snapshot, response)
    }

    async fn write(
        &self,
        snapshot: &Snapshot,
        request: Request<BoxedBody>,
    ) -> Result<Response<BoxedBody>, Error> {
        if request.body().is_end_stream() {
            return self.forward(request).await;
        }

        let url = effective_url(&request);
        let dictionary = if snapshot.config().preflight_writes {
            let head = preflight_request(snapshot, &request, &url);
            self.preflight(snapshot, head).await?
        } else {
            held_candidates(snapshot, &url).into_iter().next()
        };
        debug!(
            "Compressing {} {url} with dictionary {:?}",
            request.method(),
            dictionary.map(|d| d.id())
        );

        let (mut parts, body) = request.into_parts();
        let encoder = snapshot.codec().encoder(dictionary.map(Arc::as_ref))?;
        let compressed = EncodingBody::new(body, encoder).collect().await?.to_bytes();

        parts.headers.remove(TRANSFER_ENCODING);
        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(compressed.len()));
        headers::set_encoding(&mut parts.headers, dictionary.map(Arc::as_ref));

        let request = Request::from_parts(parts, response::full(compressed));
        let response = self.forward(request).await?;
        decode_response(snapshot, response)
    }

    /// Asks the server which dictionary it wants for a write, via `HEAD`.
    async fn preflight<'s>(
        &self,
        snapshot: &'s Snapshot,
        head: Request<BoxedBody>,
    ) -> Result<Option<&'s Arc<Dictionary>>, Error> {
        let response = self
            .inner
            .round_trip(head)
            .await
            .map_err(Error::Preflight)?;
        let Some(id) = headers::dictionary_id(response.headers()) else {
            return Ok(None);
        };
        let dictionary = snapshot.dictionaries().lookup(id);
        if dictionary.is_none() {
            warn!("Server chose dictionary {id:?}, which isn't cached; sending without one");
        }
        Ok(dictionary)
    }
}

#[async_trait]
impl<T> RoundTripper for NegotiatingTransport<T>
where
    T: RoundTripper,
{
    async fn round_trip(
        &self,
        request: Request<BoxedBody>,
    ) -> Result<Response<BoxedBody>, BoxError> {
        Ok(self.send(request).await?)
    }
}

/// The URL that match-table patterns are compared against.
///
/// Requests with a relative URI are resolved against their `Host` header. The scheme is
/// unknown at that point and is always taken to be `http`, so patterns starting with
/// `https://` never match such requests; give the request an absolute URI instead.
pub fn effective_url<B>(request: &Request<B>) -> String {
    let uri = request.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    match request.headers().get(HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{host}{path}"),
        None => path.to_owned(),
    }
}

/// Cached dictionaries assigned to `url`, in match-table order.
fn held_candidates<'s>(snapshot: &'s Snapshot, url: &str) -> Vec<&'s Arc<Dictionary>> {
    snapshot
        .candidate_ids(url)
        .into_iter()
        .filter_map(|id| snapshot.dictionaries().lookup(id))
        .collect()
}

fn advertise(headers: &mut HeaderMap, candidates: &[&Arc<Dictionary>]) {
    if candidates.is_empty() {
        headers.insert(ACCEPT_ENCODING, Encoding::Zstd.header_value());
        return;
    }
    headers.append(ACCEPT_ENCODING, Encoding::SharedZstd.header_value());
    headers.append(ACCEPT_ENCODING, Encoding::Zstd.header_value());
    for dictionary in candidates {
        headers.append(AVAILABLE_DICTIONARY, dictionary.header_value().clone());
    }
}

/// A bodiless `HEAD` to the same URI, carrying the original headers plus the read-path
/// advertisement.
fn preflight_request(
    snapshot: &Snapshot,
    request: &Request<BoxedBody>,
    url: &str,
) -> Request<BoxedBody> {
    let mut head = Request::new(response::empty());
    *head.method_mut() = Method::HEAD;
    *head.uri_mut() = request.uri().clone();
    *head.version_mut() = request.version();
    *head.headers_mut() = request.headers().clone();
    head.headers_mut().remove(CONTENT_LENGTH);
    head.headers_mut().remove(TRANSFER_ENCODING);
    advertise(head.headers_mut(), &held_candidates(snapshot, url));
    head
}

/// Wraps a `zstd`/`szstd` response body in a decoder.
///
/// A response naming a dictionary that isn't cached is decoded without one, which will
/// usually fail once the body is read.
fn decode_response(
    snapshot: &Snapshot,
    response: Response<BoxedBody>,
) -> Result<Response<BoxedBody>, Error> {
    let (mut parts, body) = response.into_parts();
    let dictionary = match Encoding::from_headers(&parts.headers) {
        None => return Ok(Response::from_parts(parts, body)),
        Some(Encoding::Zstd) => None,
        Some(Encoding::SharedZstd) => {
            let id = headers::dictionary_id(&parts.headers);
            let dictionary = id.and_then(|id| snapshot.dictionaries().lookup(id));
            if dictionary.is_none() {
                warn!("Response uses dictionary {id:?}, which isn't cached; decoding without one");
            }
            dictionary
        }
    };
    let decoder = snapshot.codec().decoder(dictionary.map(Arc::as_ref))?;
    parts.headers.remove(CONTENT_LENGTH);
    let body = DecodingBody::new(body, decoder);
    Ok(Response::from_parts(parts, response::boxed(body)))
}

pub mod test_utils {
    use super::*;

    use std::future::Future;
    use std::pin::Pin;
    use std::task::{ready, Poll};

    use hyper::service::Service;

    type ResultFuture<'a> = dyn Future<Output = Result<Response<BoxedBody>, BoxError>> + Send + 'a;
    type Responder = dyn Fn(Request<BoxedBody>) -> Pin<Box<ResultFuture<'static>>> + Send + Sync;

    /// Mock [`RoundTripper`] that holds a closure that can respond to requests with fake
    /// responses, or errors.
    ///
    /// ```rust
    /// use futures::FutureExt;
    /// use http::Response;
    ///
    /// use szstd::response;
    /// use szstd::transport::test_utils::RoundTripperMock;
    /// use szstd::BoxError;
    ///
    /// let mock = RoundTripperMock::from(|request: http::Request<_>| {
    ///     // note the `async { ... }.boxed()`!
    ///     async move {
    ///         if request.uri().path().contains("coffee") {
    ///             Err(BoxError::from("i'm a teapot"))
    ///         } else {
    ///             Ok(Response::new(response::full("earl grey, hot")))
    ///         }
    ///     }
    ///     .boxed()
    /// });
    /// ```
    pub struct RoundTripperMock {
        responder: Box<Responder>,
    }

    #[async_trait]
    impl RoundTripper for RoundTripperMock {
        async fn round_trip(
            &self,
            request: Request<BoxedBody>,
        ) -> Result<Response<BoxedBody>, BoxError> {
            (self.responder)(request).await
        }
    }

    impl<F> From<F> for RoundTripperMock
    where
        F: Fn(Request<BoxedBody>) -> Pin<Box<ResultFuture<'static>>> + Send + Sync + 'static,
    {
        fn from(value: F) -> Self {
            Self {
                responder: Box::new(value),
            }
        }
    }

    /// Routes requests straight into a server-side [`Service`], with no network in between.
    pub struct ServiceRoundTripper<S>(pub S);

    // Written out by hand: the service future is polled from a closure rather than awaited
    // in an `async` block, which `Send` inference can't see through for `S::Future`.
    impl<S, RB> RoundTripper for ServiceRoundTripper<S>
    where
        S: Service<Request<BoxedBody>, Response = Response<RB>> + Send + Sync,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        RB: Body<Data = bytes::Bytes> + Send + 'static,
        RB::Error: Into<BoxError>,
    {
        fn round_trip<'life0, 'async_trait>(
            &'life0 self,
            request: Request<BoxedBody>,
        ) -> Pin<Box<ResultFuture<'async_trait>>>
        where
            'life0: 'async_trait,
            Self: 'async_trait,
        {
            let mut future = Box::pin(self.0.call(request));
            Box::pin(std::future::poll_fn(move |cx| {
                match ready!(future.as_mut().poll(cx)) {
                    Ok(response) => Poll::Ready(Ok(response.map(response::boxed))),
                    Err(err) => Poll::Ready(Err(Into::<BoxError>::into(err))),
                }
            }))
        }
    }
}
