//! Response body decompression
//!
//! Compressed body bytes are fed through a write-side flate2 decoder as
//! they come off the framing layer; decoded output is handed back and the
//! compressed input is discarded, never retained.
//!
//! Servers disagree on what `Content-Encoding: deflate` means: some send a
//! zlib-wrapped stream (RFC 1950), others a raw deflate stream (RFC 1951).
//! The inflater starts with the zlib framing and, if the very first feed
//! reports a data error, re-initializes as raw deflate and replays the
//! bytes seen so far.

use std::io::Write;

use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::HeaderMap;

use crate::error::{self, Error};
use crate::http::header_str;

/// Content coding selected from the `Content-Encoding` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Gzip,
    Deflate,
}

impl ContentCoding {
    /// Pick the coding the inflater can undo, if the response declares
    /// one. `identity` and unknown codings return `None`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = header_str(headers, "content-encoding")?;
        match value.trim() {
            v if v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip") => {
                Some(ContentCoding::Gzip)
            }
            v if v.eq_ignore_ascii_case("deflate") => Some(ContentCoding::Deflate),
            _ => None,
        }
    }
}

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

impl Decoder {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Decoder::Gzip(d) => d.write_all(data),
            Decoder::Zlib(d) => d.write_all(data),
            Decoder::Raw(d) => d.write_all(data),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Decoder::Gzip(d) => d.flush(),
            Decoder::Zlib(d) => d.flush(),
            Decoder::Raw(d) => d.flush(),
        }
    }

    fn take_output(&mut self) -> Vec<u8> {
        let out = match self {
            Decoder::Gzip(d) => d.get_mut(),
            Decoder::Zlib(d) => d.get_mut(),
            Decoder::Raw(d) => d.get_mut(),
        };
        std::mem::take(out)
    }

    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Decoder::Gzip(d) => d.finish(),
            Decoder::Zlib(d) => d.finish(),
            Decoder::Raw(d) => d.finish(),
        }
    }
}

/// Incremental inflate stream for one reply.
pub struct Inflater {
    decoder: Option<Decoder>,
    coding: ContentCoding,
    /// Bytes fed so far, kept only until the framing guess is committed.
    replay: Option<Vec<u8>>,
}

impl Inflater {
    #[must_use]
    pub fn new(coding: ContentCoding) -> Self {
        let decoder = match coding {
            ContentCoding::Gzip => Decoder::Gzip(GzDecoder::new(Vec::new())),
            ContentCoding::Deflate => Decoder::Zlib(ZlibDecoder::new(Vec::new())),
        };
        Self {
            decoder: Some(decoder),
            coding,
            replay: match coding {
                ContentCoding::Deflate => Some(Vec::new()),
                ContentCoding::Gzip => None,
            },
        }
    }

    /// Feed compressed bytes, returning whatever decoded output they
    /// produced.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let decoder = self
            .decoder
            .as_mut()
            .expect("inflater used after finish");

        match decoder.write(data).and_then(|()| decoder.flush()) {
            Ok(()) => {
                let out = decoder.take_output();
                // Output means the framing guess was right; stop buffering.
                if !out.is_empty() {
                    self.replay = None;
                }
                if let Some(replay) = self.replay.as_mut() {
                    replay.extend_from_slice(data);
                }
                Ok(out)
            }
            Err(e) => {
                if let Some(mut replay) = self.replay.take() {
                    replay.extend_from_slice(data);
                    tracing::debug!(
                        "zlib-wrapped deflate rejected, retrying as raw deflate stream"
                    );
                    let mut raw = Decoder::Raw(DeflateDecoder::new(Vec::new()));
                    raw.write(&replay)
                        .and_then(|()| raw.flush())
                        .map_err(error::decompression)?;
                    let out = raw.take_output();
                    self.decoder = Some(raw);
                    return Ok(out);
                }
                Err(error::decompression(e))
            }
        }
    }

    /// Finalize the stream at end of body, returning any tail output.
    pub fn finish(&mut self) -> Result<Vec<u8>, Error> {
        match self.decoder.take() {
            Some(decoder) => decoder.finish().map_err(error::decompression),
            None => Ok(Vec::new()),
        }
    }
}
