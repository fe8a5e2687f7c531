//! Minimal HTTP/1.1 client for talking to peers
//!
//! Peers are plain `http://host:port` nodes on a trusted network, so a full
//! client stack is not needed: every request opens a fresh connection, sends
//! `Connection: close` and reads the response to EOF, all under one timeout.

use serde::de::DeserializeOwned;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest response (head and body) read from a peer
pub const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;

/// HTTP client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Response larger than {0} bytes")]
    TooLarge(u64),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a peer lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Path prefix prepended to every request path (no trailing slash)
    pub base_path: String,
}

impl Endpoint {
    /// Parse `http://host[:port][/prefix]`; a missing scheme is accepted
    pub fn parse(url: &str) -> Result<Self, HttpError> {
        let url = url.trim();
        if url.starts_with("https://") {
            return Err(HttpError::InvalidUrl(format!("{} (https unsupported)", url)));
        }
        let rest = url.trim_start_matches("http://");
        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(HttpError::InvalidUrl(url.to_string()));
        }

        let (host, port) = split_host_port(authority)
            .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;

        Ok(Self {
            host,
            port,
            base_path: path.trim_end_matches('/').to_string(),
        })
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(authority: &str) -> Option<(String, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if tail.is_empty() => 80,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), 80)),
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub method: &'static str,
    pub path: &'a str,
    pub headers: Vec<(&'a str, String)>,
    pub body: Option<Vec<u8>>,
}

impl<'a> HttpRequest<'a> {
    pub fn get(path: &'a str) -> Self {
        Self {
            method: "GET",
            path,
            headers: Vec::new(),
            body: None,
        }
    }

    /// POST with a JSON body
    pub fn post_json<T: serde::Serialize>(path: &'a str, body: &T) -> Result<Self, HttpError> {
        Ok(Self {
            method: "POST",
            path,
            headers: vec![("Content-Type", "application/json".to_string())],
            body: Some(serde_json::to_vec(body)?),
        })
    }

    pub fn header(mut self, name: &'a str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Send `request` to `endpoint`, failing if the exchange exceeds `timeout`
pub async fn send(
    endpoint: &Endpoint,
    request: HttpRequest<'_>,
    timeout: Duration,
) -> Result<HttpResponse, HttpError> {
    tokio::time::timeout(timeout, exchange(endpoint, request))
        .await
        .map_err(|_| HttpError::Timeout(timeout))?
}

async fn exchange(endpoint: &Endpoint, request: HttpRequest<'_>) -> Result<HttpResponse, HttpError> {
    let mut stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;

    let body = request.body.unwrap_or_default();
    let mut head = format!(
        "{} {}{} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nAccept: application/json\r\nContent-Length: {}\r\n",
        request.method,
        endpoint.base_path,
        request.path,
        endpoint.authority(),
        body.len()
    );
    for (name, value) in &request.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes()).await?;
    if !body.is_empty() {
        stream.write_all(&body).await?;
    }
    stream.flush().await?;

    let raw = read_capped(stream, MAX_RESPONSE_BYTES).await?;
    parse_response(&raw)
}

/// Read `reader` to EOF, failing once more than `limit` bytes arrive
async fn read_capped<R: AsyncRead + Unpin>(reader: R, limit: u64) -> Result<Vec<u8>, HttpError> {
    let mut raw = Vec::new();
    reader.take(limit + 1).read_to_end(&mut raw).await?;
    if raw.len() as u64 > limit {
        return Err(HttpError::TooLarge(limit));
    }
    Ok(raw)
}

/// Parse a raw HTTP/1.1 response
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse, HttpError> {
    let split = find(raw, b"\r\n\r\n")
        .ok_or_else(|| HttpError::MalformedResponse("missing header terminator".into()))?;
    let head = std::str::from_utf8(&raw[..split])
        .map_err(|_| HttpError::MalformedResponse("non-UTF-8 headers".into()))?;
    let rest = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| HttpError::MalformedResponse(format!("bad status line: {}", status_line)))?;

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut response = HttpResponse {
        status,
        headers,
        body: Vec::new(),
    };

    let chunked = response
        .header("Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    response.body = if chunked {
        decode_chunked(rest)?
    } else if let Some(len) = response
        .header("Content-Length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        rest.get(..len)
            .ok_or_else(|| HttpError::MalformedResponse("truncated body".into()))?
            .to_vec()
    } else {
        rest.to_vec()
    };

    Ok(response)
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, HttpError> {
    let mut body = Vec::new();
    loop {
        let line_end = find(data, b"\r\n")
            .ok_or_else(|| HttpError::MalformedResponse("bad chunk header".into()))?;
        let size_line = std::str::from_utf8(&data[..line_end])
            .map_err(|_| HttpError::MalformedResponse("bad chunk header".into()))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| HttpError::MalformedResponse(format!("bad chunk size: {}", size_hex)))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(body);
        }
        let chunk = data
            .get(..size)
            .ok_or_else(|| HttpError::MalformedResponse("truncated chunk".into()))?;
        body.extend_from_slice(chunk);
        data = data.get(size + 2..).unwrap_or_default();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
