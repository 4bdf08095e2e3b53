//! Shared utilities for integration tests: a raw HTTP/1.1 client over any stream.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

use webby::{HttpServer, ServerConfig, ServerHandle};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Defaults on an ephemeral loopback port with short timeouts.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.timeouts.idle_secs = 5;
    config.timeouts.read_secs = 5;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

pub async fn start(server: HttpServer) -> ServerHandle {
    server.bind().await.expect("bind test server").spawn()
}

pub async fn connect(handle: &ServerHandle) -> TcpStream {
    TcpStream::connect(handle.local_addr()).await.expect("connect")
}

/// One parsed response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Read the next response from `stream`. Unconsumed bytes stay in `buf`.
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> RawResponse {
    read_framed(stream, buf, false).await
}

/// Like [`read_response`] for a HEAD request: the body is never read.
pub async fn read_head_response<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> RawResponse {
    read_framed(stream, buf, true).await
}

async fn read_framed<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>, head_only: bool) -> RawResponse {
    loop {
        if let Some((response, used)) = try_parse(buf, head_only, false) {
            buf.drain(..used);
            return response;
        }
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut chunk))
            .await
            .expect("timed out waiting for response")
            .expect("read failed");
        if n == 0 {
            let (response, used) = try_parse(buf, head_only, true).expect("connection closed mid-response");
            buf.drain(..used);
            return response;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn try_parse(buf: &[u8], head_only: bool, at_eof: bool) -> Option<(RawResponse, usize)> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut headers);
    let head_len = match parsed.parse(buf).expect("malformed response head") {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return None,
    };

    let status = parsed.code?;
    let version = parsed.version?;
    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();
    let mut response = RawResponse {
        status,
        version,
        headers,
        body: Vec::new(),
    };

    if head_only || status < 200 || status == 204 || status == 304 {
        return Some((response, head_len));
    }

    let rest = &buf[head_len..];
    if let Some(len) = response.header("content-length") {
        let len: usize = len.trim().parse().expect("numeric content-length");
        if rest.len() < len {
            return None;
        }
        response.body = rest[..len].to_vec();
        return Some((response, head_len + len));
    }

    if response
        .header("transfer-encoding")
        .is_some_and(|te| te.eq_ignore_ascii_case("chunked"))
    {
        let (body, used) = decode_chunked(rest)?;
        response.body = body;
        return Some((response, head_len + used));
    }

    // Close-delimited.
    if at_eof {
        response.body = rest.to_vec();
        return Some((response, buf.len()));
    }
    None
}

fn decode_chunked(data: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut pos = 0;
    let mut body = Vec::new();
    loop {
        let line_end = pos + find_crlf(&data[pos..])?;
        let line = std::str::from_utf8(&data[pos..line_end]).ok()?;
        let size = usize::from_str_radix(line.split(';').next()?.trim(), 16).ok()?;
        pos = line_end + 2;
        if size == 0 {
            loop {
                let end = pos + find_crlf(&data[pos..])?;
                let empty = end == pos;
                pos = end + 2;
                if empty {
                    return Some((body, pos));
                }
            }
        }
        if data.len() < pos + size + 2 {
            return None;
        }
        body.extend_from_slice(&data[pos..pos + size]);
        pos += size + 2;
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// True when the peer closes the stream (no more bytes) within the timeout.
pub async fn closed_by_peer<S: AsyncRead + Unpin>(stream: &mut S) -> bool {
    let mut byte = [0u8; 1];
    match tokio::time::timeout(IO_TIMEOUT, stream.read(&mut byte)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) | Err(_) => false,
    }
}
