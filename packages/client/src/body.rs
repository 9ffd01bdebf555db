//! Request body sources
//!
//! Uploads stream from a [`ByteSource`]: a resettable read pointer over a
//! possibly non-contiguous byte sequence. The channel pulls bounded slices
//! with [`ByteSource::peek`] and only [`ByteSource::advance`]s by what the
//! transport actually accepted, so a short write never loses body bytes.

use std::io;

use bytes::Bytes;

/// Abstract reader over a request body.
///
/// `peek` must keep returning the same bytes until `advance` consumes
/// them. `reset` rewinds to the beginning for a retry and reports whether
/// rewinding is possible at all.
pub trait ByteSource {
    /// Borrow up to `max` bytes at the current read pointer.
    ///
    /// An empty slice means no bytes are available right now; combine with
    /// [`ByteSource::at_end`] to distinguish exhaustion from starvation.
    fn peek(&mut self, max: usize) -> io::Result<&[u8]>;

    /// Consume `n` bytes. Callers never advance past what `peek` returned.
    fn advance(&mut self, n: usize);

    /// True once every byte has been consumed.
    fn at_end(&self) -> bool;

    /// Rewind to the start for a resend. Returns `false` when the source
    /// cannot be replayed.
    fn reset(&mut self) -> bool;

    /// Total body length, when known up front.
    fn size(&self) -> Option<u64>;
}

/// In-memory body backed by [`Bytes`].
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
    pos: usize,
    resettable: bool,
}

impl BytesSource {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            resettable: true,
        }
    }

    /// A source that refuses to rewind, for one-shot payloads.
    #[must_use]
    pub fn single_shot(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            resettable: false,
        }
    }
}

impl ByteSource for BytesSource {
    fn peek(&mut self, max: usize) -> io::Result<&[u8]> {
        let remaining = &self.data[self.pos..];
        Ok(&remaining[..remaining.len().min(max)])
    }

    fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.data.len());
        self.pos = (self.pos + n).min(self.data.len());
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn reset(&mut self) -> bool {
        if !self.resettable {
            return false;
        }
        self.pos = 0;
        true
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}
