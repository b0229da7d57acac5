// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server side of negotiation: a [`Service`] wrapper that decodes inbound bodies and
//! encodes responses

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::body::Body;
use hyper::service::Service;
use tracing::{debug, warn};

use crate::body::{DecodingBody, EncodingBody};
use crate::context::{NegotiationContext, Snapshot};
use crate::dictionary::Dictionary;
use crate::error::{BoxError, Error};
use crate::headers::{self, Encoding};
use crate::response::{self, BoxedBody, GenericResponse};

/// Wraps an inner service so that request bodies arrive decoded and responses leave
/// compressed with whatever dictionary the client and server agree on.
///
/// `HEAD` requests (when [`crate::Config::handle_head_requests`] is set) are answered
/// directly, so a client can find out which dictionary would be used without a body being
/// produced.
#[derive(Clone, Debug)]
pub struct NegotiatingService<S> {
    inner: S,
    context: Arc<NegotiationContext>,
}

impl<S> NegotiatingService<S> {
    pub fn new(inner: S, context: Arc<NegotiationContext>) -> Self {
        Self { inner, context }
    }

    pub fn context(&self) -> &Arc<NegotiationContext> {
        &self.context
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, B, RB> Service<Request<B>> for NegotiatingService<S>
where
    S: Service<Request<DecodingBody<B>>, Response = Response<RB>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Body,
    B::Error: Into<BoxError>,
    RB: Body<Data = Bytes> + Send + 'static,
    RB::Error: Into<BoxError>,
{
    type Response = GenericResponse;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<B>) -> Self::Future {
        let snapshot = self.context.snapshot();
        let (mut parts, body) = request.into_parts();

        let body = match decode_request(&snapshot, &mut parts, body) {
            Ok(body) => body,
            Err(err @ Error::MissingDictionaryForTaggedEncoding { .. }) => {
                warn!("Rejecting {} {}: {err}", parts.method, parts.uri);
                return ready(response::text(StatusCode::BAD_REQUEST, err));
            }
            Err(err) => {
                warn!("Couldn't decode {} {}: {err}", parts.method, parts.uri);
                return ready(response::text(StatusCode::INTERNAL_SERVER_ERROR, err));
            }
        };

        let dictionary = select_dictionary(&snapshot, &parts.headers, &parts.uri.to_string());
        let dictionary = dictionary.cloned();
        let encoding = Encoding::for_dictionary(dictionary.as_deref());
        debug!(
            "Responding to {} {} with {encoding} (dictionary {:?})",
            parts.method,
            parts.uri,
            dictionary.as_ref().map(|d| d.id())
        );

        if parts.method == Method::HEAD && snapshot.config().handle_head_requests {
            let mut response = Response::new(response::empty());
            headers::set_encoding(response.headers_mut(), dictionary.as_deref());
            headers::add_vary(response.headers_mut());
            return ready(response);
        }

        let encoder = match snapshot.codec().encoder(dictionary.as_deref()) {
            Ok(encoder) => encoder,
            Err(err) => {
                warn!("Couldn't set up response encoder: {err}");
                return ready(response::text(StatusCode::INTERNAL_SERVER_ERROR, err));
            }
        };

        let future = self.inner.call(Request::from_parts(parts, body));
        Box::pin(async move {
            let response = future.await?;
            let (mut parts, body) = response.into_parts();
            if !may_encode(parts.status, &parts.headers) {
                return Ok(Response::from_parts(parts, response::boxed(body)));
            }
            parts.headers.remove(CONTENT_LENGTH);
            headers::set_encoding(&mut parts.headers, dictionary.as_deref());
            headers::add_vary(&mut parts.headers);
            let body = EncodingBody::new(body, encoder);
            Ok(Response::from_parts(parts, response::boxed(body)))
        })
    }
}

fn ready<E>(
    response: Response<BoxedBody>,
) -> Pin<Box<dyn Future<Output = Result<Response<BoxedBody>, E>> + Send>>
where
    E: Send + 'static,
{
    Box::pin(std::future::ready(Ok(response)))
}

fn has_body_method(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH].contains(method)
}

/// Wraps `body` in a decoder if its `Content-Encoding` calls for one.
fn decode_request<B>(
    snapshot: &Snapshot,
    parts: &mut Parts,
    body: B,
) -> Result<DecodingBody<B>, Error>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    if !has_body_method(&parts.method) || body.is_end_stream() {
        return Ok(DecodingBody::passthrough(body));
    }
    let dictionary = match Encoding::from_headers(&parts.headers) {
        None => return Ok(DecodingBody::passthrough(body)),
        Some(Encoding::Zstd) => None,
        Some(encoding @ Encoding::SharedZstd) => {
            let id = headers::dictionary_id(&parts.headers);
            let dictionary = id.and_then(|id| snapshot.dictionaries().lookup(id));
            match dictionary {
                Some(dictionary) => Some(dictionary),
                None => {
                    return Err(Error::MissingDictionaryForTaggedEncoding {
                        encoding,
                        id: id.map(str::to_owned),
                    })
                }
            }
        }
    };
    let decoder = snapshot.codec().decoder(dictionary.map(Arc::as_ref))?;
    parts.headers.remove(CONTENT_LENGTH);
    Ok(DecodingBody::new(body, decoder))
}

/// Picks the response dictionary for a request to `url`.
///
/// Clients that don't accept `szstd` get none. A `Dictionary-Id` names the dictionary
/// outright; otherwise the first `Available-Dictionary` entry that the match table allows
/// for `url` and that's cached wins.
pub fn select_dictionary<'a>(
    snapshot: &'a Snapshot,
    headers: &HeaderMap,
    url: &str,
) -> Option<&'a Arc<Dictionary>> {
    if !headers::accepts(headers, Encoding::SharedZstd) {
        return None;
    }
    if let Some(id) = headers::dictionary_id(headers) {
        let dictionary = snapshot.dictionaries().lookup(id);
        if dictionary.is_none() {
            debug!("Requested dictionary {id:?} isn't cached");
        }
        return dictionary;
    }
    let allowed = snapshot.inverted_match_table();
    let candidates = headers::available_dictionaries(headers)
        .into_iter()
        .filter(|id| allowed.allows(id, url));
    snapshot.dictionaries().find_first(candidates)
}

/// Responses without a body, or whose body is already encoded, are left alone.
fn may_encode(status: StatusCode, headers: &HeaderMap) -> bool {
    let bodiless = status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    !bodiless && !headers.contains_key(CONTENT_ENCODING)
}
