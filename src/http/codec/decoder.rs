//! Incremental request decoder.
//!
//! # Responsibilities
//! - Parse the start line and header block (httparse)
//! - Enforce header count, header bytes and body size limits
//! - Resolve body framing (Content-Length or chunked) and reassemble the body
//! - Keep partial state between reads so nothing is parsed twice

use bytes::{Buf, BytesMut};

use crate::http::codec::chunked::{ChunkDecoder, ChunkEvent};
use crate::http::codec::{Limit, ParseError};
use crate::http::headers::{self, Headers};
use crate::http::method::{Method, UnknownMethod, Version};
use crate::http::request::{wants_keep_alive, Request};

/// Bounds applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    pub max_header_count: usize,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_header_count: 64,
            max_header_bytes: 16 * 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug)]
struct Head {
    method: Result<Method, UnknownMethod>,
    target: String,
    version: Version,
    headers: Headers,
    expects_continue: bool,
}

#[derive(Debug)]
enum Framing {
    Length { remaining: usize },
    Chunked(ChunkDecoder),
}

#[derive(Debug)]
enum State {
    Head,
    Body {
        head: Head,
        framing: Framing,
        body: BytesMut,
    },
}

/// Turns buffered bytes into requests, one at a time.
#[derive(Debug)]
pub struct RequestDecoder {
    limits: DecoderLimits,
    state: State,
}

impl RequestDecoder {
    pub fn new(limits: DecoderLimits) -> Self {
        Self {
            limits,
            state: State::Head,
        }
    }

    /// True between messages, before any byte of the next head is parsed.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Head)
    }

    /// Returns true once per request whose head asked for `100 Continue`
    /// while its body is still outstanding.
    pub fn take_continue(&mut self) -> bool {
        match &mut self.state {
            State::Body { head, .. } if head.expects_continue => {
                head.expects_continue = false;
                true
            }
            _ => false,
        }
    }

    /// Decode the next request from `buf`.
    ///
    /// Consumed bytes are removed from `buf`. `Ok(None)` means the frame is
    /// incomplete and more bytes are needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
        let result = self.decode_inner(buf);
        if result.is_err() {
            self.state = State::Head;
        }
        result
    }

    fn decode_inner(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
        if let State::Head = self.state {
            let Some((head, framing)) = self.parse_head(buf)? else {
                return Ok(None);
            };
            self.state = State::Body {
                head,
                framing,
                body: BytesMut::new(),
            };
        }

        let State::Body { framing, body, .. } = &mut self.state else {
            return Ok(None);
        };
        if !read_body(framing, body, buf, self.limits.max_body_bytes)? {
            return Ok(None);
        }

        let State::Body { head, body, .. } = std::mem::replace(&mut self.state, State::Head) else {
            return Ok(None);
        };
        let keep_alive = wants_keep_alive(head.version, &head.headers);
        let method = head.method.map_err(|method| ParseError::UnknownMethod {
            method,
            version: head.version,
            keep_alive,
        })?;
        Ok(Some(Request::from_parts(
            method,
            head.target,
            head.version,
            head.headers,
            body.freeze(),
        )))
    }

    fn parse_head(&self, buf: &mut BytesMut) -> Result<Option<(Head, Framing)>, ParseError> {
        let mut storage = vec![httparse::EMPTY_HEADER; self.limits.max_header_count];
        let mut parsed = httparse::Request::new(&mut storage);

        let consumed = match parsed.parse(buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                if buf.len() > self.limits.max_header_bytes {
                    return Err(ParseError::RequestTooLarge(Limit::HeaderBytes));
                }
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => {
                return Err(ParseError::RequestTooLarge(Limit::HeaderCount));
            }
            Err(httparse::Error::Version) => return Err(ParseError::UnsupportedVersion),
            Err(httparse::Error::HeaderName) | Err(httparse::Error::HeaderValue) => {
                return Err(ParseError::MalformedHeader);
            }
            Err(_) => return Err(ParseError::MalformedStartLine),
        };
        if consumed > self.limits.max_header_bytes {
            return Err(ParseError::RequestTooLarge(Limit::HeaderBytes));
        }

        let version = match parsed.version {
            Some(0) => Version::Http10,
            Some(1) => Version::Http11,
            _ => return Err(ParseError::UnsupportedVersion),
        };
        let method = parsed
            .method
            .ok_or(ParseError::MalformedStartLine)?
            .parse::<Method>();
        let target = parsed.path.ok_or(ParseError::MalformedStartLine)?.to_string();

        let mut header_map = Headers::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(|_| ParseError::MalformedHeader)?;
            header_map.append(header.name, value.trim());
        }

        let framing = resolve_framing(&header_map, self.limits.max_body_bytes)?;
        let body_pending = match &framing {
            Framing::Length { remaining } => *remaining > 0,
            Framing::Chunked(_) => true,
        };
        let expects_continue = version == Version::Http11
            && body_pending
            && header_map.has_token(headers::EXPECT, "100-continue");

        buf.advance(consumed);
        Ok(Some((
            Head {
                method,
                target,
                version,
                headers: header_map,
                expects_continue,
            },
            framing,
        )))
    }
}

fn resolve_framing(headers: &Headers, max_body: usize) -> Result<Framing, ParseError> {
    let has_te = headers.contains(headers::TRANSFER_ENCODING);
    let has_cl = headers.contains(headers::CONTENT_LENGTH);

    if has_te && has_cl {
        return Err(ParseError::ConflictingFraming);
    }

    if has_te {
        let codings: Vec<String> = headers
            .get_all(headers::TRANSFER_ENCODING)
            .flat_map(|v| v.split(','))
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        return match codings.as_slice() {
            [only] if only == "chunked" => Ok(Framing::Chunked(ChunkDecoder::new())),
            [] => Err(ParseError::UnsupportedTransferEncoding(String::new())),
            [.., last] if last != "chunked" => {
                Err(ParseError::UnsupportedTransferEncoding(last.clone()))
            }
            [first, ..] => Err(ParseError::UnsupportedTransferEncoding(first.clone())),
        };
    }

    let mut length: Option<usize> = None;
    for value in headers
        .get_all(headers::CONTENT_LENGTH)
        .flat_map(|v| v.split(','))
        .map(str::trim)
    {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidContentLength);
        }
        let parsed: usize = value.parse().map_err(|_| ParseError::InvalidContentLength)?;
        match length {
            Some(existing) if existing != parsed => return Err(ParseError::InvalidContentLength),
            _ => length = Some(parsed),
        }
    }

    let remaining = length.unwrap_or(0);
    if remaining > max_body {
        return Err(ParseError::RequestTooLarge(Limit::Body));
    }
    Ok(Framing::Length { remaining })
}

/// Move body bytes from `buf` into `body`. Returns true when the body is complete.
fn read_body(
    framing: &mut Framing,
    body: &mut BytesMut,
    buf: &mut BytesMut,
    max_body: usize,
) -> Result<bool, ParseError> {
    match framing {
        Framing::Length { remaining } => {
            let n = (*remaining).min(buf.len());
            body.extend_from_slice(&buf[..n]);
            buf.advance(n);
            *remaining -= n;
            Ok(*remaining == 0)
        }
        Framing::Chunked(decoder) => loop {
            match decoder.decode(buf)? {
                Some(ChunkEvent::Data(data)) => {
                    if body.len() + data.len() > max_body {
                        return Err(ParseError::RequestTooLarge(Limit::Body));
                    }
                    body.extend_from_slice(&data);
                }
                Some(ChunkEvent::End) => return Ok(true),
                None => return Ok(false),
            }
        },
    }
}

/// Convenience for callers holding a complete message in memory.
pub fn decode_bytes(input: &[u8], limits: DecoderLimits) -> Result<Option<Request>, ParseError> {
    let mut buf = BytesMut::from(input);
    RequestDecoder::new(limits).decode(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn decoder() -> RequestDecoder {
        RequestDecoder::new(DecoderLimits::default())
    }

    #[test]
    fn decodes_get_without_body() {
        let req = decode_bytes(b"GET /hello?x=1 HTTP/1.1\r\nHost: x\r\n\r\n", DecoderLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.query().get("x"), Some("1"));
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header("host"), Some("x"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn content_length_body_across_partial_reads() {
        let wire = b"POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world";
        for split in 1..wire.len() {
            let mut dec = decoder();
            let mut buf = BytesMut::from(&wire[..split]);
            let first = dec.decode(&mut buf).unwrap();
            let req = match first {
                Some(req) => req,
                None => {
                    buf.put_slice(&wire[split..]);
                    dec.decode(&mut buf).unwrap().expect("complete after second read")
                }
            };
            assert_eq!(&req.body()[..], b"hello world", "split at {}", split);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn reads_exactly_content_length_and_leaves_pipelined_bytes() {
        let mut buf = BytesMut::from(
            &b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\n\r\n"[..],
        );
        let mut dec = decoder();
        let first = dec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.body()[..], b"abc");
        let second = dec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.path(), "/b");
    }

    #[test]
    fn chunked_body_is_reassembled() {
        let req = decode_bytes(
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            DecoderLimits::default(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(&req.body()[..], b"hello world");
    }

    #[test]
    fn conflicting_framing_is_rejected() {
        let err = decode_bytes(
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n",
            DecoderLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err, ParseError::ConflictingFraming);
    }

    #[test]
    fn differing_content_lengths_are_rejected() {
        let err = decode_bytes(
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n",
            DecoderLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err, ParseError::InvalidContentLength);
        let err = decode_bytes(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n", DecoderLimits::default())
            .unwrap_err();
        assert_eq!(err, ParseError::InvalidContentLength);
    }

    #[test]
    fn unsupported_transfer_coding_is_rejected() {
        let err = decode_bytes(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n",
            DecoderLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err, ParseError::UnsupportedTransferEncoding("gzip".into()));
    }

    #[test]
    fn malformed_start_line_is_rejected() {
        let err = decode_bytes(b"GET\r\n\r\n", DecoderLimits::default()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedStartLine | ParseError::UnsupportedVersion));
        let err = decode_bytes(b"GET / HTTP/2.0\r\n\r\n", DecoderLimits::default()).unwrap_err();
        assert_eq!(err, ParseError::UnsupportedVersion);
    }

    #[test]
    fn header_limits_are_enforced() {
        let limits = DecoderLimits {
            max_header_count: 2,
            ..DecoderLimits::default()
        };
        let err = decode_bytes(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n", limits).unwrap_err();
        assert_eq!(err, ParseError::RequestTooLarge(Limit::HeaderCount));

        let limits = DecoderLimits {
            max_header_bytes: 64,
            ..DecoderLimits::default()
        };
        let big = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(200));
        let err = decode_bytes(big.as_bytes(), limits).unwrap_err();
        assert_eq!(err, ParseError::RequestTooLarge(Limit::HeaderBytes));

        // An unterminated header block is bounded too.
        let partial = format!("GET / HTTP/1.1\r\nX-Big: {}", "a".repeat(200));
        let err = decode_bytes(partial.as_bytes(), limits).unwrap_err();
        assert_eq!(err, ParseError::RequestTooLarge(Limit::HeaderBytes));
    }

    #[test]
    fn body_limit_is_enforced() {
        let limits = DecoderLimits {
            max_body_bytes: 4,
            ..DecoderLimits::default()
        };
        let err = decode_bytes(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n", limits).unwrap_err();
        assert_eq!(err, ParseError::RequestTooLarge(Limit::Body));
        let err = decode_bytes(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            limits,
        )
        .unwrap_err();
        assert_eq!(err, ParseError::RequestTooLarge(Limit::Body));
    }

    #[test]
    fn unknown_method_consumes_the_message() {
        let mut buf = BytesMut::from(
            &b"BREW /pot HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiGET / HTTP/1.1\r\n\r\n"[..],
        );
        let mut dec = decoder();
        let err = dec.decode(&mut buf).unwrap_err();
        assert!(err.keeps_framing());
        assert!(err.reply_options().keep_alive);
        let next = dec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.method(), Method::Get);
    }

    #[test]
    fn unknown_method_remembers_close_intent() {
        let err = decode_bytes(b"BREW /pot HTTP/1.1\r\nConnection: close\r\n\r\n", DecoderLimits::default())
            .unwrap_err();
        assert!(!err.reply_options().keep_alive);

        let err = decode_bytes(b"BREW /pot HTTP/1.0\r\n\r\n", DecoderLimits::default()).unwrap_err();
        let opts = err.reply_options();
        assert_eq!(opts.version, Version::Http10);
        assert!(!opts.keep_alive);

        let err = decode_bytes(b"BREW /pot HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", DecoderLimits::default())
            .unwrap_err();
        assert!(err.reply_options().keep_alive);
    }

    #[test]
    fn framing_errors_always_close() {
        let err = decode_bytes(
            b"POST / HTTP/1.1\r\nContent-Length: 1\r\nTransfer-Encoding: chunked\r\n\r\n",
            DecoderLimits::default(),
        )
        .unwrap_err();
        assert!(!err.reply_options().keep_alive);
    }

    #[test]
    fn expect_continue_is_reported_once() {
        let mut buf = BytesMut::from(
            &b"PUT /f HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n"[..],
        );
        let mut dec = decoder();
        assert!(dec.decode(&mut buf).unwrap().is_none());
        assert!(!dec.is_idle());
        assert!(dec.take_continue());
        assert!(!dec.take_continue());
        buf.put_slice(b"ok");
        let req = dec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&req.body()[..], b"ok");
        assert!(dec.is_idle());
    }
}
