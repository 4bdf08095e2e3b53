//! Chunked transfer-coding.
//!
//! The decoder is incremental: it yields data as soon as it is buffered and
//! can be driven directly by streaming consumers. Once the last chunk and the
//! trailer section are consumed it is finished and cannot be restarted.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::http::codec::ParseError;

/// Upper bound on a chunk-size line or a trailer line.
const MAX_LINE: usize = 4096;

/// One step of chunked decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// A piece of chunk data (may be a fraction of a wire chunk).
    Data(Bytes),
    /// The zero-length chunk and trailers have been consumed.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailers,
    Done,
}

#[derive(Debug)]
pub struct ChunkDecoder {
    state: State,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self { state: State::Size }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Consume what `buf` holds and return the next event.
    ///
    /// `Ok(None)` means more bytes are needed (or the decoder is finished).
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ChunkEvent>, ParseError> {
        loop {
            match self.state {
                State::Size => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    let size = parse_size(&line)?;
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::Data { remaining: size }
                    };
                }
                State::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(buf.len());
                    let data = buf.split_to(n).freeze();
                    self.state = if n == remaining {
                        State::DataEnd
                    } else {
                        State::Data { remaining: remaining - n }
                    };
                    return Ok(Some(ChunkEvent::Data(data)));
                }
                State::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunk("missing CRLF after chunk data"));
                    }
                    buf.advance(2);
                    self.state = State::Size;
                }
                State::Trailers => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    // Trailer fields are read and dropped.
                    if line.is_empty() {
                        self.state = State::Done;
                        return Ok(Some(ChunkEvent::End));
                    }
                }
                State::Done => return Ok(None),
            }
        }
    }
}

/// Remove one CRLF-terminated line from `buf`, without the terminator.
fn take_line(buf: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) if pos > MAX_LINE => Err(ParseError::InvalidChunk("line too long")),
        Some(pos) => {
            let line = buf.split_to(pos);
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > MAX_LINE => Err(ParseError::InvalidChunk("line too long")),
        None => Ok(None),
    }
}

fn parse_size(line: &[u8]) -> Result<usize, ParseError> {
    // Chunk extensions are ignored.
    let size = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let size = std::str::from_utf8(size)
        .map_err(|_| ParseError::InvalidChunk("chunk size is not ASCII"))?
        .trim_matches(|c| c == ' ' || c == '\t');
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunk("chunk size is not hexadecimal"));
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk("chunk size overflow"))
}

/// Append one chunk. Empty input writes nothing, since a zero-size chunk ends the body.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    dst.reserve(data.len() + 20);
    dst.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Append the terminating zero-length chunk with an empty trailer section.
pub fn encode_last_chunk(dst: &mut BytesMut) {
    dst.put_slice(b"0\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Vec<u8>, ParseError> {
        let mut buf = BytesMut::from(input);
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        while let Some(event) = decoder.decode(&mut buf)? {
            match event {
                ChunkEvent::Data(data) => out.extend_from_slice(&data),
                ChunkEvent::End => return Ok(out),
            }
        }
        Err(ParseError::InvalidChunk("incomplete"))
    }

    #[test]
    fn decodes_simple_body() {
        let body = decode_all(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, b"Wikipedia");
    }

    #[test]
    fn ignores_extensions_and_trailers() {
        let body = decode_all(b"3;name=value\r\nabc\r\n0\r\nExpires: never\r\n\r\n").unwrap();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn round_trip_preserves_bytes() {
        let original: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut wire = BytesMut::new();
        for piece in original.chunks(777) {
            encode_chunk(piece, &mut wire);
        }
        encode_last_chunk(&mut wire);
        assert_eq!(decode_all(&wire).unwrap(), original);
    }

    #[test]
    fn byte_at_a_time_feeding() {
        let wire = b"A\r\n0123456789\r\n0\r\n\r\n";
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        let mut finished = false;
        for byte in wire {
            buf.put_u8(*byte);
            while let Some(event) = decoder.decode(&mut buf).unwrap() {
                match event {
                    ChunkEvent::Data(data) => out.extend_from_slice(&data),
                    ChunkEvent::End => finished = true,
                }
            }
        }
        assert!(finished);
        assert!(decoder.is_done());
        assert_eq!(out, b"0123456789");
    }

    #[test]
    fn rejects_bad_size() {
        assert!(matches!(decode_all(b"zz\r\nabc\r\n0\r\n\r\n"), Err(ParseError::InvalidChunk(_))));
        assert!(matches!(decode_all(b"\r\n"), Err(ParseError::InvalidChunk(_))));
    }

    #[test]
    fn rejects_missing_data_terminator() {
        assert!(matches!(decode_all(b"3\r\nabcXY0\r\n\r\n"), Err(ParseError::InvalidChunk(_))));
    }

    #[test]
    fn rejects_overflowing_size() {
        assert!(matches!(
            decode_all(b"FFFFFFFFFFFFFFFFFFFF\r\n"),
            Err(ParseError::InvalidChunk("chunk size overflow"))
        ));
    }
}
