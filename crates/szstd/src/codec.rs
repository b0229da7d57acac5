// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! zstd compression with optional pre-shared dictionaries
//!
//! [`StreamEncoder`] and [`StreamDecoder`] are incremental: they accept input in whatever
//! pieces it arrives and hand back whatever output is ready. [`Codec`] drives them from a
//! [`Read`] into a [`Write`], one `buffer_size` chunk at a time.

use std::io::{self, ErrorKind, Read, Write};

use bytes::Bytes;
use zstd::stream::raw::Operation;

use crate::config::Config;
use crate::dictionary::Dictionary;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("couldn't create zstd context: {0}")]
    Init(#[source] io::Error),
    #[error("couldn't read input: {0}")]
    Read(#[source] io::Error),
    #[error("couldn't write output: {0}")]
    Write(#[source] io::Error),
    #[error("couldn't finish zstd frame: {0}")]
    Flush(#[source] io::Error),
    #[error("couldn't decode zstd data: {0}")]
    Decode(#[source] io::Error),
}

/// Compression parameters taken from a [`Config`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    pub level: i32,
    pub buffer_size: usize,
}

impl Codec {
    pub fn new(level: i32, buffer_size: usize) -> Self {
        Self { level, buffer_size }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.compression_level, config.buffer_size)
    }

    pub fn encoder(&self, dictionary: Option<&Dictionary>) -> Result<StreamEncoder, CodecError> {
        StreamEncoder::new(self.level, dictionary)
    }

    pub fn decoder(&self, dictionary: Option<&Dictionary>) -> Result<StreamDecoder, CodecError> {
        StreamDecoder::new(self.buffer_size, dictionary)
    }

    /// Compresses all of `source` into `sink` as a single frame.
    ///
    /// The frame is always finished, so an empty source still produces a valid (tiny) frame.
    /// Returns the number of compressed bytes written.
    pub fn compress<R: Read, W: Write>(
        &self,
        source: R,
        mut sink: W,
        dictionary: Option<&Dictionary>,
    ) -> Result<u64, CodecError> {
        let mut encoder = self.encoder(dictionary)?;
        let mut written = 0;
        self.for_each_chunk(source, |chunk| {
            let output = encoder.encode(chunk)?;
            written += write_out(&mut sink, &output)?;
            Ok(())
        })?;
        let output = encoder.finish()?;
        written += write_out(&mut sink, &output)?;
        sink.flush().map_err(CodecError::Flush)?;
        Ok(written)
    }

    /// Decompresses all of `source` into `sink`, returning the number of bytes written.
    ///
    /// An empty source decodes to nothing; a source ending partway through a frame is an
    /// error.
    pub fn decompress<R: Read, W: Write>(
        &self,
        source: R,
        mut sink: W,
        dictionary: Option<&Dictionary>,
    ) -> Result<u64, CodecError> {
        let mut decoder = self.decoder(dictionary)?;
        let mut written = 0;
        self.for_each_chunk(source, |chunk| {
            let output = decoder.decode(chunk)?;
            written += write_out(&mut sink, &output)?;
            Ok(())
        })?;
        decoder.finish()?;
        sink.flush().map_err(CodecError::Flush)?;
        Ok(written)
    }

    pub fn compress_to_vec(
        &self,
        data: &[u8],
        dictionary: Option<&Dictionary>,
    ) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.compress(data, &mut out, dictionary)?;
        Ok(out)
    }

    pub fn decompress_to_vec(
        &self,
        data: &[u8],
        dictionary: Option<&Dictionary>,
    ) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.decompress(data, &mut out, dictionary)?;
        Ok(out)
    }

    fn for_each_chunk<R: Read>(
        &self,
        mut source: R,
        mut f: impl FnMut(&[u8]) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let mut buffer = vec![0; self.buffer_size.max(1)];
        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(CodecError::Read(err)),
            };
            f(&buffer[..n])?;
        }
    }
}

fn write_out(sink: &mut impl Write, output: &[u8]) -> Result<u64, CodecError> {
    sink.write_all(output).map_err(CodecError::Write)?;
    Ok(output.len() as u64)
}

/// Incremental compressor producing a single zstd frame.
pub struct StreamEncoder {
    inner: zstd::stream::write::Encoder<'static, Vec<u8>>,
}

impl StreamEncoder {
    pub fn new(level: i32, dictionary: Option<&Dictionary>) -> Result<Self, CodecError> {
        let inner = match dictionary {
            Some(dictionary) => {
                zstd::stream::write::Encoder::with_dictionary(Vec::new(), level, dictionary.bytes())
            }
            None => zstd::stream::write::Encoder::new(Vec::new(), level),
        }
        .map_err(CodecError::Init)?;
        Ok(Self { inner })
    }

    /// Feeds `input` to the compressor, returning any compressed output that's ready.
    pub fn encode(&mut self, input: &[u8]) -> Result<Bytes, CodecError> {
        self.inner.write_all(input).map_err(CodecError::Write)?;
        Ok(std::mem::take(self.inner.get_mut()).into())
    }

    /// Ends the frame, returning the remaining output.
    pub fn finish(self) -> Result<Bytes, CodecError> {
        let output = self.inner.finish().map_err(CodecError::Flush)?;
        Ok(output.into())
    }
}

/// Incremental decompressor. Accepts any number of concatenated frames.
pub struct StreamDecoder {
    inner: zstd::stream::raw::Decoder<'static>,
    scratch: Vec<u8>,
    in_frame: bool,
}

impl StreamDecoder {
    pub fn new(buffer_size: usize, dictionary: Option<&Dictionary>) -> Result<Self, CodecError> {
        let inner = match dictionary {
            Some(dictionary) => zstd::stream::raw::Decoder::with_dictionary(dictionary.bytes()),
            None => zstd::stream::raw::Decoder::new(),
        }
        .map_err(CodecError::Init)?;
        Ok(Self {
            inner,
            scratch: vec![0; buffer_size.max(1)],
            in_frame: false,
        })
    }

    /// Feeds `input` to the decompressor, returning all output it produces.
    pub fn decode(&mut self, mut input: &[u8]) -> Result<Bytes, CodecError> {
        if input.is_empty() {
            return Ok(Bytes::new());
        }
        let mut output = Vec::new();
        loop {
            let status = self
                .inner
                .run_on_buffers(input, &mut self.scratch)
                .map_err(CodecError::Decode)?;
            input = &input[status.bytes_read..];
            output.extend_from_slice(&self.scratch[..status.bytes_written]);
            if status.bytes_read > 0 || status.bytes_written > 0 {
                self.in_frame = status.remaining != 0;
            }
            // A full scratch buffer may mean more output is pending.
            if input.is_empty() && status.bytes_written < self.scratch.len() {
                return Ok(output.into());
            }
        }
    }

    /// Checks that the input didn't stop partway through a frame.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.in_frame {
            return Err(CodecError::Decode(io::Error::new(
                ErrorKind::UnexpectedEof,
                "input ended partway through a zstd frame",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use quickcheck_macros::quickcheck;

    const DICTIONARY_TEXT: &[u8] = b"2017 NAICS Code,2017 NAICS Title,GHG,Unit,\
        Supply Chain Emission Factors without Margins,Margins of Supply Chain Emission Factors,\
        Supply Chain Emission Factors with Margins,Reference USEEIO Code";

    fn dictionary() -> Dictionary {
        Dictionary::new("supply_chain", DICTIONARY_TEXT).unwrap()
    }

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..200 {
            data.extend_from_slice(DICTIONARY_TEXT);
            data.extend_from_slice(format!("\n{i},Soybean Farming,{}\n", i * 7).as_bytes());
        }
        data
    }

    #[quickcheck]
    fn round_trip(data: Vec<u8>, use_dictionary: bool, buffer_size: u8) -> bool {
        let codec = Codec::new(3, usize::from(buffer_size).max(1));
        let dictionary = dictionary();
        let dictionary = use_dictionary.then_some(&dictionary);
        let compressed = codec.compress_to_vec(&data, dictionary).unwrap();
        codec.decompress_to_vec(&compressed, dictionary).unwrap() == data
    }

    #[test]
    fn round_trip_large_input_with_small_buffers() {
        let codec = Codec::new(5, 7);
        let data = sample();
        let dictionary = dictionary();
        let compressed = codec.compress_to_vec(&data, Some(&dictionary)).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(
            codec.decompress_to_vec(&compressed, Some(&dictionary)).unwrap(),
            data
        );
    }

    #[test]
    fn wrong_dictionary_never_yields_the_original() {
        let codec = Codec::new(5, 1024);
        let data = sample();
        let compressed = codec.compress_to_vec(&data, Some(&dictionary())).unwrap();

        let other = Dictionary::new("other", &b"something else entirely"[..]).unwrap();
        let result = codec.decompress_to_vec(&compressed, Some(&other));
        assert!(result.map_or(true, |out| out != data));
        let result = codec.decompress_to_vec(&compressed, None);
        assert!(result.map_or(true, |out| out != data));
    }

    #[test]
    fn empty_input_makes_a_valid_frame() {
        let codec = Codec::new(5, 1024);
        let compressed = codec.compress_to_vec(b"", None).unwrap();
        assert!(!compressed.is_empty());
        assert!(codec.decompress_to_vec(&compressed, None).unwrap().is_empty());
    }

    #[test]
    fn empty_source_decodes_to_nothing() {
        let codec = Codec::new(5, 1024);
        assert!(codec.decompress_to_vec(b"", None).unwrap().is_empty());
    }

    #[test]
    fn garbage_and_truncated_input_are_errors() {
        let codec = Codec::new(5, 1024);
        let err = codec
            .decompress_to_vec(b"definitely not zstd", None)
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)), "{err}");

        let compressed = codec.compress_to_vec(&sample(), None).unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        let err = codec.decompress_to_vec(truncated, None).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)), "{err}");
    }

    #[test]
    fn concatenated_frames_decode_in_sequence() {
        let codec = Codec::new(5, 16);
        let mut stream = codec.compress_to_vec(b"first ", None).unwrap();
        stream.extend(codec.compress_to_vec(b"second", None).unwrap());
        assert_eq!(codec.decompress_to_vec(&stream, None).unwrap(), b"first second");
    }

    #[test]
    fn byte_counts_match_output() {
        let codec = Codec::new(5, 64);
        let data = sample();
        let mut compressed = Vec::new();
        let written = codec.compress(&data[..], &mut compressed, None).unwrap();
        assert_eq!(written, compressed.len() as u64);

        let mut decompressed = Vec::new();
        let written = codec
            .decompress(&compressed[..], &mut decompressed, None)
            .unwrap();
        assert_eq!(written, data.len() as u64);
    }
}
