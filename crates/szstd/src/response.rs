// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Body and response helpers

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Body;
use hyper::Response;
pub use hyper::StatusCode;

use crate::error::BoxError;

/// Type-erased body used on both sides of negotiation.
///
/// Not `Sync`, since zstd contexts may not be.
pub type BoxedBody = UnsyncBoxBody<Bytes, BoxError>;

/// Type-erased HTTP response
pub type GenericResponse = Response<BoxedBody>;

/// Erase the type of `body`.
pub fn boxed<B>(body: B) -> BoxedBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// A body with no content.
pub fn empty() -> BoxedBody {
    boxed(Empty::new())
}

/// A body with known content.
pub fn full(content: impl Into<Bytes>) -> BoxedBody {
    boxed(Full::new(content.into()))
}

/// Return a plain text response with known content.
pub fn text(status: StatusCode, content: impl ToString) -> GenericResponse {
    let mut response = Response::new(full(content.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Return a plain text "404 not found" response with appropriate status code
pub fn not_found() -> GenericResponse {
    text(StatusCode::NOT_FOUND, "404 not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_body(response: GenericResponse) -> Vec<u8> {
        let body = response.into_body().collect();
        futures::executor::block_on(body)
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn sanity_check_text_response() {
        let id = "supply_chain";
        let response = text(
            StatusCode::BAD_REQUEST,
            format_args!("dictionary {id:?} not found"),
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(to_body(response), b"dictionary \"supply_chain\" not found");
    }

    #[test]
    fn sanity_check_empty_body() {
        let response = Response::new(empty());
        assert_eq!(response.status(), StatusCode::OK);
        assert!(to_body(response).is_empty());
    }
}
