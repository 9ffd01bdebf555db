//! Response body framing
//!
//! Exactly one of three mutually exclusive algorithms runs per reply:
//! chunked transfer decoding, a known content length, or read-until-close.
//! The reader consumes from the channel's receive buffer and never takes
//! bytes past the end of its own response, so a pipelined successor's
//! bytes stay in the buffer.

use bytes::{Buf, BytesMut};

use crate::error::{self, Error};

/// Body length discipline, fixed once per reply when headers complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthMode {
    /// 1xx/204/304, HEAD responses, or a declared zero length.
    NoBody,
    /// `Content-Length` was present.
    Known(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Neither; body runs until the transport closes.
    UntilClose,
}

#[derive(Debug, Clone, Copy)]
enum ChunkPhase {
    /// Expecting a hex size line, optionally with a `;`-delimited extension.
    Size,
    /// Inside chunk payload.
    Data { remaining: u64 },
    /// Expecting the CRLF after a chunk's payload.
    Terminator,
    /// Expecting the CRLF after the zero-size chunk.
    FinalTerminator,
}

/// Output of one [`BodyReader::read`] pass.
#[derive(Debug, Default)]
pub struct BodyProgress {
    /// Raw (still compressed, if applicable) body bytes produced.
    pub data: Vec<u8>,
    /// The body is complete.
    pub done: bool,
}

/// Incremental decoder for one reply's body framing.
#[derive(Debug)]
pub struct BodyReader {
    mode: LengthMode,
    remaining: u64,
    chunk: ChunkPhase,
    force_close: bool,
    done: bool,
}

impl BodyReader {
    #[must_use]
    pub fn new(mode: LengthMode) -> Self {
        let remaining = match mode {
            LengthMode::Known(n) => n,
            _ => 0,
        };
        Self {
            mode,
            remaining,
            chunk: ChunkPhase::Size,
            force_close: false,
            done: matches!(mode, LengthMode::NoBody) || matches!(mode, LengthMode::Known(0)),
        }
    }

    #[must_use]
    pub fn mode(&self) -> LengthMode {
        self.mode
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Malformed chunk terminator seen; the channel must close after this
    /// reply instead of being reused.
    #[must_use]
    pub fn force_close(&self) -> bool {
        self.force_close
    }

    /// Consume body bytes from `input`, producing at most `max` raw body
    /// bytes this pass.
    pub fn read(&mut self, input: &mut BytesMut, max: usize) -> Result<BodyProgress, Error> {
        if self.done {
            return Ok(BodyProgress {
                data: Vec::new(),
                done: true,
            });
        }
        match self.mode {
            LengthMode::NoBody => Ok(BodyProgress {
                data: Vec::new(),
                done: true,
            }),
            LengthMode::Known(_) => {
                let take = (self.remaining.min(max as u64) as usize).min(input.len());
                let data = input.split_to(take).to_vec();
                self.remaining -= take as u64;
                self.done = self.remaining == 0;
                Ok(BodyProgress {
                    data,
                    done: self.done,
                })
            }
            LengthMode::UntilClose => {
                let take = input.len().min(max);
                let data = input.split_to(take).to_vec();
                Ok(BodyProgress { data, done: false })
            }
            LengthMode::Chunked => self.read_chunked(input, max),
        }
    }

    /// The transport reported EOF. Returns `Ok(true)` when that legally
    /// completes the body, an error when the body was cut short.
    pub fn on_eof(&mut self) -> Result<bool, Error> {
        if self.done {
            return Ok(true);
        }
        match self.mode {
            LengthMode::UntilClose => {
                self.done = true;
                Ok(true)
            }
            LengthMode::NoBody => {
                self.done = true;
                Ok(true)
            }
            LengthMode::Known(_) | LengthMode::Chunked => Err(error::premature_eof()),
        }
    }

    fn read_chunked(&mut self, input: &mut BytesMut, max: usize) -> Result<BodyProgress, Error> {
        let mut out = Vec::new();

        loop {
            match self.chunk {
                ChunkPhase::Size => {
                    let Some(line_end) = find_line_end(input) else {
                        break;
                    };
                    let line = input.split_to(line_end.total);
                    let size = parse_chunk_size(&line[..line_end.content])?;
                    if size == 0 {
                        self.chunk = ChunkPhase::FinalTerminator;
                    } else {
                        self.chunk = ChunkPhase::Data { remaining: size };
                    }
                }
                ChunkPhase::Data { remaining } => {
                    if out.len() >= max {
                        break;
                    }
                    let budget = max - out.len();
                    let take = (remaining.min(budget as u64) as usize).min(input.len());
                    if take == 0 {
                        break;
                    }
                    out.extend_from_slice(&input.split_to(take));
                    let left = remaining - take as u64;
                    if left == 0 {
                        self.chunk = ChunkPhase::Terminator;
                    } else {
                        self.chunk = ChunkPhase::Data { remaining: left };
                    }
                }
                ChunkPhase::Terminator | ChunkPhase::FinalTerminator => {
                    let ending = matches!(self.chunk, ChunkPhase::FinalTerminator);
                    match consume_terminator(input) {
                        TerminatorProgress::NeedMore => break,
                        TerminatorProgress::Ok => {
                            if ending {
                                self.done = true;
                                break;
                            }
                            self.chunk = ChunkPhase::Size;
                        }
                        TerminatorProgress::Malformed => {
                            // End the reply anyway, but poison the channel.
                            self.force_close = true;
                            self.done = true;
                            break;
                        }
                    }
                }
            }
            if self.done {
                break;
            }
        }

        Ok(BodyProgress {
            data: out,
            done: self.done,
        })
    }
}

struct LineEnd {
    /// Bytes of content before the terminator.
    content: usize,
    /// Content plus terminator.
    total: usize,
}

/// Locate the next line terminator, accepting both CRLF and bare LF.
fn find_line_end(input: &BytesMut) -> Option<LineEnd> {
    let lf = input.iter().position(|&b| b == b'\n')?;
    let content = if lf > 0 && input[lf - 1] == b'\r' {
        lf - 1
    } else {
        lf
    };
    Some(LineEnd {
        content,
        total: lf + 1,
    })
}

/// Parse a chunk-size line: hex digits, then optionally `;` and an
/// extension which is ignored.
fn parse_chunk_size(line: &[u8]) -> Result<u64, Error> {
    let end = line
        .iter()
        .position(|&b| b == b';')
        .unwrap_or(line.len());
    let digits = std::str::from_utf8(&line[..end])
        .map_err(|_| error::malformed_chunk_framing())?
        .trim();
    if digits.is_empty() {
        return Err(error::malformed_chunk_framing());
    }
    u64::from_str_radix(digits, 16).map_err(|_| error::malformed_chunk_framing())
}

enum TerminatorProgress {
    NeedMore,
    Ok,
    Malformed,
}

fn consume_terminator(input: &mut BytesMut) -> TerminatorProgress {
    match input.first() {
        None => TerminatorProgress::NeedMore,
        Some(b'\n') => {
            input.advance(1);
            TerminatorProgress::Ok
        }
        Some(b'\r') => match input.get(1) {
            None => TerminatorProgress::NeedMore,
            Some(b'\n') => {
                input.advance(2);
                TerminatorProgress::Ok
            }
            Some(_) => TerminatorProgress::Malformed,
        },
        Some(_) => TerminatorProgress::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn known_length_delivers_exactly_n_bytes() {
        let mut reader = BodyReader::new(LengthMode::Known(5));
        let mut input = buf(b"helloEXTRA");
        let progress = reader.read(&mut input, usize::MAX).unwrap();
        assert_eq!(progress.data, b"hello");
        assert!(progress.done);
        // The pipelined successor's bytes stay in the buffer.
        assert_eq!(&input[..], b"EXTRA");
    }

    #[test]
    fn known_length_respects_read_cap() {
        let mut reader = BodyReader::new(LengthMode::Known(10));
        let mut input = buf(b"0123456789");
        let progress = reader.read(&mut input, 4).unwrap();
        assert_eq!(progress.data, b"0123");
        assert!(!progress.done);
        let progress = reader.read(&mut input, 100).unwrap();
        assert_eq!(progress.data, b"456789");
        assert!(progress.done);
    }

    #[test]
    fn chunked_round_trip() {
        let mut reader = BodyReader::new(LengthMode::Chunked);
        let mut input = buf(b"5\r\nhello\r\n0\r\n\r\n");
        let progress = reader.read(&mut input, usize::MAX).unwrap();
        assert_eq!(progress.data, b"hello");
        assert!(progress.done);
        assert!(!reader.force_close());
        assert!(input.is_empty());
    }

    #[test]
    fn chunked_across_split_input() {
        let mut reader = BodyReader::new(LengthMode::Chunked);
        let mut out = Vec::new();
        for piece in [&b"5\r\nhe"[..], b"llo\r\n3\r\nxyz", b"\r\n0\r\n\r\n"] {
            let mut input = buf(piece);
            let progress = reader.read(&mut input, usize::MAX).unwrap();
            out.extend(progress.data);
            assert!(input.is_empty());
        }
        assert_eq!(out, b"helloxyz");
        assert!(reader.is_done());
    }

    #[test]
    fn chunk_extension_is_ignored() {
        let mut reader = BodyReader::new(LengthMode::Chunked);
        let mut input = buf(b"5;name=value\r\nhello\r\n0\r\n\r\n");
        let progress = reader.read(&mut input, usize::MAX).unwrap();
        assert_eq!(progress.data, b"hello");
        assert!(progress.done);
    }

    #[test]
    fn bare_lf_line_endings_accepted() {
        let mut reader = BodyReader::new(LengthMode::Chunked);
        let mut input = buf(b"5\nhello\n0\n\n");
        let progress = reader.read(&mut input, usize::MAX).unwrap();
        assert_eq!(progress.data, b"hello");
        assert!(progress.done);
    }

    #[test]
    fn malformed_size_line_is_a_parse_error() {
        let mut reader = BodyReader::new(LengthMode::Chunked);
        let mut input = buf(b"zz\r\nhello\r\n");
        assert!(reader.read(&mut input, usize::MAX).is_err());
    }

    #[test]
    fn malformed_terminator_forces_close_but_ends_reply() {
        let mut reader = BodyReader::new(LengthMode::Chunked);
        let mut input = buf(b"5\r\nhelloXX");
        let progress = reader.read(&mut input, usize::MAX).unwrap();
        assert_eq!(progress.data, b"hello");
        assert!(progress.done);
        assert!(reader.force_close());
    }

    #[test]
    fn until_close_ends_on_eof_only() {
        let mut reader = BodyReader::new(LengthMode::UntilClose);
        let mut input = buf(b"partial");
        let progress = reader.read(&mut input, usize::MAX).unwrap();
        assert_eq!(progress.data, b"partial");
        assert!(!progress.done);
        assert!(reader.on_eof().unwrap());
        assert!(reader.is_done());
    }

    #[test]
    fn eof_mid_known_length_is_premature() {
        let mut reader = BodyReader::new(LengthMode::Known(10));
        let mut input = buf(b"12345");
        reader.read(&mut input, usize::MAX).unwrap();
        assert!(reader.on_eof().is_err());
    }

    #[test]
    fn no_body_modes_complete_immediately() {
        assert!(BodyReader::new(LengthMode::NoBody).is_done());
        assert!(BodyReader::new(LengthMode::Known(0)).is_done());
    }
}
