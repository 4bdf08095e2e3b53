//! Response encoder.
//!
//! # Responsibilities
//! - Choose body framing (Content-Length, chunked, close-delimited or none)
//! - Write the status line and headers before any body byte
//! - Refuse status/header changes once the head is on the wire

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::codec::chunked::{encode_chunk, encode_last_chunk};
use crate::http::headers::{self, Headers};
use crate::http::method::Version;
use crate::http::response::{Body, Response};
use crate::http::status::StatusCode;

/// How a response is being written on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Version of the request being answered.
    pub version: Version,
    /// The request was `HEAD`: headers only.
    pub head_only: bool,
    /// Whether the connection may persist after this response.
    pub keep_alive: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            version: Version::Http11,
            head_only: false,
            keep_alive: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("response already committed")]
    Committed,

    #[error("body length mismatch: declared {declared}, wrote {written}")]
    LengthMismatch { declared: u64, written: u64 },

    #[error("response body stream failed: {0}")]
    Body(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// No body bytes follow the head.
    None,
    Length { declared: u64 },
    Chunked,
    /// Body ends when the connection closes (HTTP/1.0 only).
    CloseDelimited,
}

/// Writes one response to `io`.
///
/// Status and headers may be changed until the head is written, either
/// explicitly with [`ResponseWriter::write_head`] or implicitly by the first
/// body write.
pub struct ResponseWriter<'a, W> {
    io: &'a mut W,
    status: StatusCode,
    headers: Headers,
    opts: WriteOptions,
    framing: Option<Framing>,
    keep_alive: bool,
    written: u64,
}

impl<'a, W> ResponseWriter<'a, W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: &'a mut W, status: StatusCode, headers: Headers, opts: WriteOptions) -> Self {
        Self {
            io,
            status,
            headers,
            opts,
            framing: None,
            keep_alive: opts.keep_alive,
            written: 0,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.framing.is_some()
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), EncodeError> {
        if self.is_committed() {
            return Err(EncodeError::Committed);
        }
        self.status = status;
        Ok(())
    }

    pub fn headers_mut(&mut self) -> Result<&mut Headers, EncodeError> {
        if self.is_committed() {
            return Err(EncodeError::Committed);
        }
        Ok(&mut self.headers)
    }

    /// Commit the head. `length` is the body size when known upfront.
    pub async fn write_head(&mut self, length: Option<u64>) -> Result<(), EncodeError> {
        if self.is_committed() {
            return Err(EncodeError::Committed);
        }

        let framing = self.prepare_headers(length);
        let mut head = BytesMut::with_capacity(256);
        head.extend_from_slice(self.opts.version.as_str().as_bytes());
        head.extend_from_slice(b" ");
        head.extend_from_slice(self.status.to_string().as_bytes());
        head.extend_from_slice(b"\r\n");
        head.extend_from_slice(self.headers.to_string().as_bytes());
        head.extend_from_slice(b"\r\n");

        self.framing = Some(framing);
        self.io.write_all(&head).await?;
        Ok(())
    }

    /// Append body bytes, committing the head with unknown length if needed.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if !self.is_committed() {
            self.write_head(None).await?;
        }
        if data.is_empty() {
            return Ok(());
        }
        match self.framing {
            Some(Framing::None) | None => {}
            Some(Framing::Length { declared }) => {
                let written = self.written + data.len() as u64;
                if written > declared {
                    return Err(EncodeError::LengthMismatch { declared, written });
                }
                self.io.write_all(data).await?;
            }
            Some(Framing::Chunked) => {
                let mut buf = BytesMut::with_capacity(data.len() + 20);
                encode_chunk(data, &mut buf);
                self.io.write_all(&buf).await?;
            }
            Some(Framing::CloseDelimited) => self.io.write_all(data).await?,
        }
        self.written += data.len() as u64;
        Ok(())
    }

    /// Terminate the body and flush. Returns whether the connection may persist.
    pub async fn finish(mut self) -> Result<bool, EncodeError> {
        if !self.is_committed() {
            self.write_head(Some(0)).await?;
        }
        match self.framing {
            Some(Framing::Length { declared }) if declared != self.written => {
                return Err(EncodeError::LengthMismatch {
                    declared,
                    written: self.written,
                });
            }
            Some(Framing::Chunked) => {
                let mut buf = BytesMut::with_capacity(5);
                encode_last_chunk(&mut buf);
                self.io.write_all(&buf).await?;
            }
            _ => {}
        }
        self.io.flush().await?;
        Ok(self.keep_alive)
    }

    /// Replace framing headers with the ones this response will actually use.
    fn prepare_headers(&mut self, length: Option<u64>) -> Framing {
        self.headers.remove(headers::CONTENT_LENGTH);
        self.headers.remove(headers::TRANSFER_ENCODING);

        if self.headers.has_token(headers::CONNECTION, "close") {
            self.keep_alive = false;
        }

        let framing = if !self.status.allows_body() {
            Framing::None
        } else {
            if length != Some(0) {
                self.headers
                    .insert_if_absent(headers::CONTENT_TYPE, "text/plain; charset=utf-8");
            }
            match (length, self.opts.version) {
                (Some(len), _) => {
                    self.headers.append(headers::CONTENT_LENGTH, len.to_string());
                    Framing::Length { declared: len }
                }
                (None, Version::Http11) => {
                    if !self.opts.head_only {
                        self.headers.append(headers::TRANSFER_ENCODING, "chunked");
                    }
                    Framing::Chunked
                }
                (None, Version::Http10) => {
                    self.keep_alive = false;
                    Framing::CloseDelimited
                }
            }
        };

        self.headers.remove(headers::CONNECTION);
        if !self.keep_alive {
            self.headers.append(headers::CONNECTION, "close");
        } else if self.opts.version == Version::Http10 {
            self.headers.append(headers::CONNECTION, "keep-alive");
        }

        if self.opts.head_only {
            Framing::None
        } else {
            framing
        }
    }
}

/// Encode and write a complete response. Returns whether the connection may persist.
pub async fn write_response<W>(
    io: &mut W,
    response: Response,
    opts: WriteOptions,
) -> Result<bool, EncodeError>
where
    W: AsyncWrite + Unpin,
{
    let (status, headers, body) = response.into_parts();
    let mut writer = ResponseWriter::new(io, status, headers, opts);

    match body {
        Body::Empty => writer.write_head(Some(0)).await?,
        Body::Full(bytes) => {
            writer.write_head(Some(bytes.len() as u64)).await?;
            writer.write_chunk(&bytes).await?;
        }
        Body::Stream(mut stream) => {
            writer.write_head(None).await?;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(EncodeError::Body)?;
                writer.write_chunk(&chunk).await?;
            }
        }
    }

    writer.finish().await
}

/// Write an interim `100 Continue`.
pub async fn write_continue<W>(io: &mut W, version: Version) -> Result<(), EncodeError>
where
    W: AsyncWrite + Unpin,
{
    let line = format!("{} {}\r\n\r\n", version.as_str(), StatusCode::CONTINUE);
    io.write_all(line.as_bytes()).await?;
    io.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn encode(response: Response, opts: WriteOptions) -> (String, bool) {
        let mut out: Vec<u8> = Vec::new();
        let keep_alive = write_response(&mut out, response, opts).await.unwrap();
        (String::from_utf8(out).unwrap(), keep_alive)
    }

    #[tokio::test]
    async fn buffered_body_gets_content_length() {
        let (wire, keep_alive) = encode(Response::text(StatusCode::OK, "hello"), WriteOptions::default()).await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\nhello"));
        assert!(keep_alive);
    }

    #[tokio::test]
    async fn body_without_content_type_defaults_to_text() {
        let (wire, _) = encode(
            Response::bytes(StatusCode::OK, Bytes::from_static(b"raw")),
            WriteOptions::default(),
        )
        .await;
        assert!(wire.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    }

    #[tokio::test]
    async fn stream_is_chunked_on_http11() {
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"Wiki")),
            Ok(Bytes::from_static(b"pedia")),
        ]);
        let (wire, keep_alive) = encode(Response::stream(StatusCode::OK, chunks), WriteOptions::default()).await;
        assert!(wire.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!wire.contains("Content-Length"));
        assert!(wire.ends_with("\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"));
        assert!(keep_alive);
    }

    #[tokio::test]
    async fn stream_is_close_delimited_on_http10() {
        let chunks = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"data"))]);
        let opts = WriteOptions {
            version: Version::Http10,
            ..WriteOptions::default()
        };
        let (wire, keep_alive) = encode(Response::stream(StatusCode::OK, chunks), opts).await;
        assert!(wire.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.ends_with("\r\n\r\ndata"));
        assert!(!keep_alive);
    }

    #[tokio::test]
    async fn bodiless_statuses_and_head_carry_no_body() {
        let (wire, _) = encode(Response::text(StatusCode::NO_CONTENT, "ignored"), WriteOptions::default()).await;
        assert!(wire.ends_with("\r\n\r\n"));
        assert!(!wire.contains("ignored"));
        assert!(!wire.contains("Content-Length"));

        let opts = WriteOptions {
            head_only: true,
            ..WriteOptions::default()
        };
        let (wire, _) = encode(Response::text(StatusCode::OK, "hello"), opts).await;
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn connection_headers_reflect_keep_alive() {
        let opts = WriteOptions {
            keep_alive: false,
            ..WriteOptions::default()
        };
        let (wire, keep_alive) = encode(Response::ok(), opts).await;
        assert!(wire.contains("Connection: close\r\n"));
        assert!(!keep_alive);

        let opts = WriteOptions {
            version: Version::Http10,
            ..WriteOptions::default()
        };
        let (wire, keep_alive) = encode(Response::ok(), opts).await;
        assert!(wire.contains("Connection: keep-alive\r\n"));
        assert!(keep_alive);

        let (_, keep_alive) = encode(
            Response::ok().with_header("Connection", "close"),
            WriteOptions::default(),
        )
        .await;
        assert!(!keep_alive);
    }

    #[tokio::test]
    async fn head_is_immutable_after_commit() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, StatusCode::OK, Headers::new(), WriteOptions::default());
        writer.headers_mut().unwrap().append("x-early", "1");
        writer.write_chunk(b"first").await.unwrap();
        assert!(writer.is_committed());
        assert!(matches!(writer.set_status(StatusCode::NOT_FOUND), Err(EncodeError::Committed)));
        assert!(matches!(writer.headers_mut(), Err(EncodeError::Committed)));
        writer.finish().await.unwrap();
        let wire = String::from_utf8(out).unwrap();
        assert!(wire.contains("x-early: 1\r\n"));
    }

    #[tokio::test]
    async fn short_body_is_a_length_mismatch() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, StatusCode::OK, Headers::new(), WriteOptions::default());
        writer.write_head(Some(10)).await.unwrap();
        writer.write_chunk(b"abc").await.unwrap();
        assert!(matches!(
            writer.finish().await,
            Err(EncodeError::LengthMismatch { declared: 10, written: 3 })
        ));
    }
}
