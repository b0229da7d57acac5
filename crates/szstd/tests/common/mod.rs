// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::FutureExt;
use http::header::HeaderName;
use http::{HeaderMap, Method, Request, Response, Uri};
use http_body_util::BodyExt;
use szstd::response::BoxedBody;
use szstd::transport::test_utils::RoundTripperMock;
use szstd::{BoxError, Codec, Dictionary, MatchTable, NegotiationContext, PartialConfig};
use tempfile::TempDir;

pub const SUPPLY_CHAIN: &[u8] = b"2017 NAICS Code,2017 NAICS Title,GHG,Unit,\
    Supply Chain Emission Factors without Margins,Margins of Supply Chain Emission Factors,\
    Supply Chain Emission Factors with Margins,Reference USEEIO Code\n";

pub const ENWIK8: &[u8] = b"<mediawiki xmlns=\"http://www.mediawiki.org/xml/export-0.3/\">\
    <siteinfo><sitename>Wikipedia</sitename><base>http://en.wikipedia.org/wiki/Main_Page</base>";

pub struct Fixture {
    pub dir: TempDir,
    pub context: Arc<NegotiationContext>,
}

impl Fixture {
    pub fn dictionary(&self, id: &str) -> Arc<Dictionary> {
        self.context
            .snapshot()
            .dictionaries()
            .lookup(id)
            .unwrap()
            .clone()
    }
}

/// `supply_chain` and `enwik8` on disk, routed from `/app1/*` and `/app2/*` respectively.
pub fn fixture(update: PartialConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("supply_chain.dict"), SUPPLY_CHAIN).unwrap();
    std::fs::create_dir(dir.path().join("wiki")).unwrap();
    std::fs::write(dir.path().join("wiki/enwik8.dict"), ENWIK8).unwrap();

    let defaults = PartialConfig {
        dictionary_directory: Some(dir.path().to_owned()),
        match_table: Some(
            MatchTable::new()
                .with_rule("/app1/*", "not_on_disk")
                .with_rule("/app1/*", "supply_chain")
                .with_rule("/app2/*", "enwik8"),
        ),
        ..Default::default()
    };
    let context = NegotiationContext::with_config(defaults.merge(update)).unwrap();
    Fixture {
        dir,
        context: Arc::new(context),
    }
}

pub fn csv_payload() -> Vec<u8> {
    let mut payload = SUPPLY_CHAIN.to_vec();
    for i in 0..100 {
        payload.extend_from_slice(
            format!("1111A0,Oilseed farming,Carbon dioxide,kg/2018 USD,0.{i:03},0.001\n")
                .as_bytes(),
        );
    }
    payload
}

pub fn codec() -> Codec {
    Codec::new(5, 1024)
}

pub async fn body_bytes(body: BoxedBody) -> Bytes {
    body.collect().await.unwrap().to_bytes()
}

pub fn header_values(headers: &HeaderMap, name: impl http::header::AsHeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .map(|value| value.to_str().unwrap().to_owned())
        .collect()
}

pub fn header(headers: &HeaderMap, name: &'static str) -> Option<String> {
    headers
        .get(HeaderName::from_static(name))
        .map(|value| value.to_str().unwrap().to_owned())
}

/// One request as seen by [`recording_mock`].
#[derive(Debug)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type Log = Arc<Mutex<Vec<Recorded>>>;

/// A [`RoundTripperMock`] that records each request (with its body collected) before
/// answering it with `respond`.
pub fn recording_mock<F>(respond: F) -> (RoundTripperMock, Log)
where
    F: Fn(&Recorded) -> Result<Response<BoxedBody>, BoxError> + Send + Sync + 'static,
{
    let log = Log::default();
    let respond = Arc::new(respond);
    let mock_log = log.clone();
    let mock = RoundTripperMock::from(move |request: Request<BoxedBody>| {
        let log = mock_log.clone();
        let respond = respond.clone();
        async move {
            let (parts, body) = request.into_parts();
            let body = body.collect().await?.to_bytes();
            let recorded = Recorded {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            };
            let response = respond(&recorded);
            log.lock().unwrap().push(recorded);
            response
        }
        .boxed()
    });
    (mock, log)
}
