// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`Body`] adapters that compress or decompress frames as they stream past

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes};
use hyper::body::{Body, Frame, SizeHint};
use pin_project::pin_project;

use crate::codec::{CodecError, StreamDecoder, StreamEncoder};
use crate::error::BoxError;

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("couldn't read body: {0}")]
    Inner(#[source] BoxError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Compresses `inner` into a single zstd frame.
///
/// Trailers from `inner` are forwarded after the end of the frame.
#[pin_project]
pub struct EncodingBody<B: Body> {
    #[pin]
    inner: B,
    encoder: Option<StreamEncoder>,
    trailers: Option<http::HeaderMap>,
    inner_error: fn(B::Error) -> BoxError,
}

impl<B: Body> EncodingBody<B> {
    pub fn new(inner: B, encoder: StreamEncoder) -> Self
    where
        B::Error: Into<BoxError>,
    {
        Self {
            inner,
            encoder: Some(encoder),
            trailers: None,
            inner_error: Into::into,
        }
    }
}

// The error conversion is captured in `new` rather than bounded here, so that
// futures holding these bodies stay `Send` when `B::Error` is itself a `BoxError`.
impl<B: Body> Body for EncodingBody<B> {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
            };
            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(mut data) => {
                        let data = data.copy_to_bytes(data.remaining());
                        match encoder.encode(&data) {
                            Ok(encoded) if encoded.is_empty() => continue,
                            Ok(encoded) => return Poll::Ready(Some(Ok(Frame::data(encoded)))),
                            Err(err) => {
                                *this.encoder = None;
                                return Poll::Ready(Some(Err(err.into())));
                            }
                        }
                    }
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            *this.trailers = Some(trailers);
                        }
                    }
                },
                Some(Err(err)) => {
                    *this.encoder = None;
                    return Poll::Ready(Some(Err(BodyError::Inner((*this.inner_error)(err)))));
                }
                None => {
                    let Some(encoder) = this.encoder.take() else {
                        continue;
                    };
                    return Poll::Ready(Some(
                        encoder
                            .finish()
                            .map(Frame::data)
                            .map_err(BodyError::from),
                    ));
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none() && self.trailers.is_none()
    }
}

enum DecodeState {
    Passthrough,
    Decoding(StreamDecoder),
    Done,
}

/// Decompresses `inner`, or (via [`DecodingBody::passthrough`]) forwards it untouched.
#[pin_project]
pub struct DecodingBody<B: Body> {
    #[pin]
    inner: B,
    state: DecodeState,
    inner_error: fn(B::Error) -> BoxError,
}

impl<B: Body> DecodingBody<B> {
    pub fn new(inner: B, decoder: StreamDecoder) -> Self
    where
        B::Error: Into<BoxError>,
    {
        Self {
            inner,
            state: DecodeState::Decoding(decoder),
            inner_error: Into::into,
        }
    }

    pub fn passthrough(inner: B) -> Self
    where
        B::Error: Into<BoxError>,
    {
        Self {
            inner,
            state: DecodeState::Passthrough,
            inner_error: Into::into,
        }
    }

    /// Whether this body decompresses (as opposed to passing data through).
    pub fn is_decoding(&self) -> bool {
        matches!(self.state, DecodeState::Decoding(_))
    }
}

impl<B: Body> Body for DecodingBody<B> {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        loop {
            if matches!(this.state, DecodeState::Done) {
                return Poll::Ready(None);
            }
            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let mut data = match frame.into_data() {
                        Ok(data) => data,
                        Err(frame) => match frame.into_trailers() {
                            Ok(trailers) => {
                                return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                            }
                            Err(_) => continue,
                        },
                    };
                    let data = data.copy_to_bytes(data.remaining());
                    let decoded = match &mut *this.state {
                        DecodeState::Decoding(decoder) => decoder.decode(&data),
                        _ => Ok(data),
                    };
                    match decoded {
                        Ok(data) if data.is_empty() => continue,
                        Ok(data) => return Poll::Ready(Some(Ok(Frame::data(data)))),
                        Err(err) => {
                            *this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(err.into())));
                        }
                    }
                }
                Some(Err(err)) => {
                    *this.state = DecodeState::Done;
                    return Poll::Ready(Some(Err(BodyError::Inner((*this.inner_error)(err)))));
                }
                None => {
                    let state = std::mem::replace(this.state, DecodeState::Done);
                    if let DecodeState::Decoding(decoder) = state {
                        if let Err(err) = decoder.finish() {
                            return Poll::Ready(Some(Err(err.into())));
                        }
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.state {
            DecodeState::Passthrough => self.inner.is_end_stream(),
            DecodeState::Decoding(_) => false,
            DecodeState::Done => true,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.state {
            DecodeState::Passthrough => self.inner.size_hint(),
            DecodeState::Decoding(_) => SizeHint::default(),
            DecodeState::Done => SizeHint::with_exact(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use futures::executor::block_on;
    use http::{HeaderMap, HeaderValue};
    use http_body_util::{BodyExt, Empty, Full, StreamBody};

    use crate::codec::Codec;
    use crate::dictionary::Dictionary;
    use crate::response;

    fn chunked(
        chunks: &[&'static [u8]],
    ) -> StreamBody<impl futures::Stream<Item = Result<Frame<Bytes>, Infallible>>> {
        let frames: Vec<_> = chunks
            .iter()
            .map(|chunk| Ok(Frame::data(Bytes::from_static(chunk))))
            .collect();
        StreamBody::new(futures::stream::iter(frames))
    }

    fn codec() -> Codec {
        Codec::new(5, 32)
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn collecting_boxed_bodies_is_send() {
        let encode = async {
            let body = EncodingBody::new(response::full("oolong"), codec().encoder(None).unwrap());
            body.collect().await.map(|collected| collected.to_bytes())
        };
        assert_send(&encode);
        let compressed = block_on(encode).unwrap();

        let decode = async move {
            let body = DecodingBody::new(response::full(compressed), codec().decoder(None).unwrap());
            body.collect().await.map(|collected| collected.to_bytes())
        };
        assert_send(&decode);
        assert_eq!(block_on(decode).unwrap(), "oolong");
    }

    #[test]
    fn encoded_chunks_decode_to_the_original() {
        let dictionary =
            Dictionary::new("enwik8", &b"'''Anarchism''' is a political philosophy"[..]).unwrap();
        let encoder = codec().encoder(Some(&dictionary)).unwrap();
        let body = EncodingBody::new(
            chunked(&[
                b"'''Anarchism''' ",
                b"is a political ",
                b"philosophy and movement",
            ]),
            encoder,
        );
        let compressed = block_on(body.collect()).unwrap().to_bytes();

        let decoded = codec()
            .decompress_to_vec(&compressed, Some(&dictionary))
            .unwrap();
        assert_eq!(decoded, b"'''Anarchism''' is a political philosophy and movement");
    }

    #[test]
    fn empty_body_still_gets_a_frame() {
        let body = EncodingBody::new(Empty::<Bytes>::new(), codec().encoder(None).unwrap());
        let compressed = block_on(body.collect()).unwrap().to_bytes();
        assert!(!compressed.is_empty());
        assert!(codec().decompress_to_vec(&compressed, None).unwrap().is_empty());
    }

    #[test]
    fn trailers_follow_the_frame() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", HeaderValue::from_static("abc"));
        let frames = vec![
            Ok::<_, Infallible>(Frame::data(Bytes::from_static(b"hello"))),
            Ok(Frame::trailers(trailers)),
        ];
        let body = EncodingBody::new(
            StreamBody::new(futures::stream::iter(frames)),
            codec().encoder(None).unwrap(),
        );
        let collected = block_on(body.collect()).unwrap();
        assert_eq!(collected.trailers().unwrap()["x-checksum"], "abc");
        let compressed = collected.to_bytes();
        assert_eq!(codec().decompress_to_vec(&compressed, None).unwrap(), b"hello");
    }

    #[test]
    fn decoding_body_handles_split_frames() {
        let compressed = codec()
            .compress_to_vec(&b"x".repeat(10_000), None)
            .unwrap();
        let (first, second) = compressed.split_at(compressed.len() / 2);
        let frames = vec![
            Ok::<_, Infallible>(Frame::data(Bytes::copy_from_slice(first))),
            Ok(Frame::data(Bytes::copy_from_slice(second))),
        ];
        let body = DecodingBody::new(
            StreamBody::new(futures::stream::iter(frames)),
            codec().decoder(None).unwrap(),
        );
        assert!(body.is_decoding());
        let decoded = block_on(body.collect()).unwrap().to_bytes();
        assert_eq!(decoded, b"x".repeat(10_000));
    }

    #[test]
    fn truncated_body_is_an_error() {
        let compressed = codec()
            .compress_to_vec(&b"y".repeat(10_000), None)
            .unwrap();
        let truncated = Bytes::copy_from_slice(&compressed[..compressed.len() - 3]);
        let body = DecodingBody::new(Full::new(truncated), codec().decoder(None).unwrap());
        let err = block_on(body.collect()).unwrap_err();
        assert!(matches!(err, BodyError::Codec(CodecError::Decode(_))), "{err}");
    }

    #[test]
    fn passthrough_forwards_untouched() {
        let body = DecodingBody::passthrough(chunked(&[b"plain ", b"text"]));
        assert!(!body.is_decoding());
        let collected = block_on(body.collect()).unwrap().to_bytes();
        assert_eq!(collected, "plain text");
    }
}
