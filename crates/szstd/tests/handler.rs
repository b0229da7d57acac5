// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

mod common;

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::service::{service_fn, Service};
use szstd::body::DecodingBody;
use szstd::headers::{AVAILABLE_DICTIONARY, DICTIONARY_ID};
use szstd::response::{self, BoxedBody};
use szstd::{NegotiatingService, PartialConfig};

use common::{body_bytes, codec, csv_payload, fixture, header, Fixture};

/// Answers every request with `csv_payload()`, except that writes are answered with the
/// length of the (decoded) body they sent. Counts how many times it runs.
#[derive(Clone, Default)]
struct Inner {
    calls: Arc<AtomicUsize>,
}

impl Service<Request<DecodingBody<BoxedBody>>> for Inner {
    type Response = Response<BoxedBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<DecodingBody<BoxedBody>>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let method = request.method().clone();
            let body = match method {
                Method::POST | Method::PUT => {
                    let received = request.into_body().collect().await.unwrap().to_bytes();
                    received.len().to_string().into_bytes()
                }
                _ => csv_payload(),
            };
            Ok(Response::new(response::full(body)))
        })
    }
}

fn server(fixture: &Fixture) -> (NegotiatingService<Inner>, Arc<AtomicUsize>) {
    let inner = Inner::default();
    let calls = inner.calls.clone();
    (
        NegotiatingService::new(inner, fixture.context.clone()),
        calls,
    )
}

fn get(path: &str, accept: &'static str, available: &[&'static str]) -> Request<BoxedBody> {
    let mut request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(ACCEPT_ENCODING, accept)
        .body(response::empty())
        .unwrap();
    for &id in available {
        request
            .headers_mut()
            .append(AVAILABLE_DICTIONARY, HeaderValue::from_static(id));
    }
    request
}

#[tokio::test]
async fn negotiates_a_dictionary_end_to_end() {
    let fixture = fixture(PartialConfig::default());
    let (service, calls) = server(&fixture);

    let request = get("/app1/emissions.csv", "szstd, zstd", &["enwik8", "supply_chain"]);
    let response = service.call(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(response.headers(), "content-encoding").unwrap(), "szstd");
    assert_eq!(header(response.headers(), "dictionary-id").unwrap(), "supply_chain");
    assert!(response.headers().get(CONTENT_LENGTH).is_none());
    assert_eq!(
        response.headers()[VARY],
        "Accept-Encoding, Available-Dictionary"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let compressed = body_bytes(response.into_body()).await;
    let dictionary = fixture.dictionary("supply_chain");
    let decoded = codec()
        .decompress_to_vec(&compressed, Some(&*dictionary))
        .unwrap();
    assert_eq!(decoded, csv_payload());

    let plain = codec().compress_to_vec(&csv_payload(), None).unwrap();
    assert!(compressed.len() < plain.len());
}

#[tokio::test]
async fn clients_without_szstd_get_plain_zstd() {
    let fixture = fixture(PartialConfig::default());
    let (service, _) = server(&fixture);

    let request = get("/app1/emissions.csv", "gzip, zstd", &["supply_chain"]);
    let response = service.call(request).await.unwrap();

    assert_eq!(response.headers()[CONTENT_ENCODING], "zstd");
    assert!(response.headers().get(DICTIONARY_ID).is_none());
    let compressed = body_bytes(response.into_body()).await;
    assert_eq!(codec().decompress_to_vec(&compressed, None).unwrap(), csv_payload());
}

#[tokio::test]
async fn unroutable_candidates_are_ignored() {
    let fixture = fixture(PartialConfig::default());
    let (service, _) = server(&fixture);

    // enwik8 is only routed from /app2/*
    let request = get("/app1/emissions.csv", "szstd", &["enwik8"]);
    let response = service.call(request).await.unwrap();
    assert_eq!(response.headers()[CONTENT_ENCODING], "zstd");
    assert!(response.headers().get(DICTIONARY_ID).is_none());
}

#[tokio::test]
async fn head_requests_short_circuit() {
    let fixture = fixture(PartialConfig::default());
    let (service, calls) = server(&fixture);

    let mut request = get("/app1/upload", "szstd, zstd", &["supply_chain"]);
    *request.method_mut() = Method::HEAD;
    let response = service.call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_ENCODING], "szstd");
    assert_eq!(response.headers()[DICTIONARY_ID], "supply_chain");
    assert!(body_bytes(response.into_body()).await.is_empty());

    let mut request = get("/elsewhere", "szstd, zstd", &["supply_chain"]);
    *request.method_mut() = Method::HEAD;
    let response = service.call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_ENCODING], "zstd");
    assert!(response.headers().get(DICTIONARY_ID).is_none());
    assert!(body_bytes(response.into_body()).await.is_empty());

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn head_requests_reach_the_inner_service_when_not_handled() {
    let fixture = fixture(PartialConfig {
        handle_head_requests: Some(false),
        ..Default::default()
    });
    let (service, calls) = server(&fixture);

    let mut request = get("/app1/upload", "szstd", &["supply_chain"]);
    *request.method_mut() = Method::HEAD;
    let response = service.call(request).await.unwrap();
    assert_eq!(response.headers()[DICTIONARY_ID], "supply_chain");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inbound_bodies_are_decoded() {
    let fixture = fixture(PartialConfig::default());
    let (service, _) = server(&fixture);
    let dictionary = fixture.dictionary("supply_chain");
    let payload = csv_payload();

    for (encoding, dictionary) in [("szstd", Some(&dictionary)), ("zstd", None)] {
        let compressed = codec()
            .compress_to_vec(&payload, dictionary.map(|d| &**d))
            .unwrap();
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/app1/upload")
            .header(CONTENT_ENCODING, encoding)
            .header(CONTENT_LENGTH, compressed.len())
            .body(response::full(compressed))
            .unwrap();
        if let Some(dictionary) = dictionary {
            request
                .headers_mut()
                .insert(DICTIONARY_ID, dictionary.header_value().clone());
        }

        let response = service.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let compressed = body_bytes(response.into_body()).await;
        let reply = codec().decompress_to_vec(&compressed, None).unwrap();
        assert_eq!(reply, payload.len().to_string().into_bytes());
    }
}

#[tokio::test]
async fn missing_inbound_dictionary_is_a_bad_request() {
    let fixture = fixture(PartialConfig::default());
    let (service, calls) = server(&fixture);

    for id in [Some("not_on_disk"), None] {
        let mut request = Request::builder()
            .method(Method::PUT)
            .uri("/app1/upload")
            .header(CONTENT_ENCODING, "szstd")
            .body(response::full(&b"\x28\xb5\x2f\xfd garbage"[..]))
            .unwrap();
        if let Some(id) = id {
            request
                .headers_mut()
                .insert(DICTIONARY_ID, HeaderValue::from_static(id));
        }

        let response = service.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let message = body_bytes(response.into_body()).await;
        assert!(String::from_utf8_lossy(&message).contains("isn't available"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bodiless_responses_are_not_encoded() {
    let fixture = fixture(PartialConfig::default());
    let inner = service_fn(|_request: Request<DecodingBody<BoxedBody>>| async {
        let mut response = Response::new(response::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        Ok::<_, Infallible>(response)
    });
    let service = NegotiatingService::new(inner, fixture.context.clone());

    let response = service
        .call(get("/app1/x", "szstd", &["supply_chain"]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().get(CONTENT_ENCODING).is_none());
}

#[tokio::test]
async fn requests_use_the_snapshot_they_started_with() {
    let fixture = fixture(PartialConfig::default());
    let (service, _) = server(&fixture);

    let request = get("/app1/emissions.csv", "szstd", &["supply_chain"]);
    let pending = service.call(request);
    fixture
        .context
        .set(PartialConfig {
            match_table: Some(Default::default()),
            ..Default::default()
        })
        .unwrap();

    let response = pending.await.unwrap();
    assert_eq!(response.headers()[DICTIONARY_ID], "supply_chain");

    let request = get("/app1/emissions.csv", "szstd", &["supply_chain"]);
    let response = service.call(request).await.unwrap();
    assert!(response.headers().get(DICTIONARY_ID).is_none());
}
