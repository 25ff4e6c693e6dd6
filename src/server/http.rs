//! Minimal HTTP/1.x request reading and response writing.
//!
//! Only what the streamer needs: a GET request line, ignored headers, and
//! `Connection: close` responses whose body is either fixed-length or an
//! open-ended multipart stream.

use std::io;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the request line plus headers
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const SERVER_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("connection closed mid-request")]
    Incomplete,

    #[error("request header exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request line: {0:?}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl Request {
    /// Request target without its query string
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    pub fn parse(head: &str) -> Result<Self, HttpError> {
        let line = head.lines().next().unwrap_or_default();
        let mut parts = line.split_whitespace();

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version), None)
                if version.starts_with("HTTP/") && target.starts_with('/') =>
            {
                Ok(Request {
                    method: method.to_string(),
                    target: target.to_string(),
                    version: version.to_string(),
                })
            }
            _ => Err(HttpError::Malformed(line.to_string())),
        }
    }
}

/// Read one request head. `Ok(None)` means the peer connected and closed
/// without sending anything.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>, HttpError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(HttpError::Incomplete)
            };
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = header_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]);
            return Request::parse(&head).map(Some);
        }

        if buf.len() > MAX_HEADER_BYTES {
            return Err(HttpError::TooLarge(MAX_HEADER_BYTES));
        }
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .or_else(|| buf.windows(2).position(|w| w == b"\n\n"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    MovedPermanently,
    BadRequest,
    NotFound,
    NotImplemented,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::MovedPermanently => 301,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::NotImplemented => 501,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::MovedPermanently => "Moved Permanently",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::NotImplemented => "Not Implemented",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    status: Status,
    headers: Vec<(&'static str, String)>,
    body: Option<Bytes>,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self::new(Status::MovedPermanently).header("Location", location)
    }

    /// Error page with a short HTML explanation
    pub fn error(status: Status) -> Self {
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><title>{code} {reason}</title></head>
<body>
    <h1>{code} - {reason}</h1>
    <p><a href="/">Go to Home</a></p>
</body>
</html>"#,
            code = status.code(),
            reason = status.reason()
        );
        Self::new(status).body("text/html; charset=utf-8", Bytes::from(html))
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: Bytes) -> Self {
        self.headers.push(("Content-Type", content_type.to_string()));
        self.headers.push(("Content-Length", body.len().to_string()));
        self.body = Some(body);
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Status line and headers, terminated by the blank line
    pub fn head(&self) -> String {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nServer: {}\r\nConnection: close\r\n",
            self.status.code(),
            self.status.reason(),
            SERVER_NAME
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.head().as_bytes()).await?;
        if let Some(ref body) = self.body {
            writer.write_all(body).await?;
        }
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_request_line() {
        let req = Request::parse("GET /stream.mjpg?t=1 HTTP/1.1\r\nHost: pi\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/stream.mjpg?t=1");
        assert_eq!(req.path(), "/stream.mjpg");
        assert_eq!(req.version, "HTTP/1.1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_matches!(Request::parse("hello"), Err(HttpError::Malformed(_)));
        assert_matches!(Request::parse("GET index.html HTTP/1.0"), Err(HttpError::Malformed(_)));
        assert_matches!(Request::parse(""), Err(HttpError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_read_request_across_chunks() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"GET /index")
            .read(b".html HTTP/1.1\r\nHost: x\r\n")
            .read(b"\r\n")
            .build();

        let req = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(req.path(), "/index.html");
    }

    #[tokio::test]
    async fn test_read_request_empty_connection() {
        let mut reader = tokio_test::io::Builder::new().build();
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_truncated() {
        let mut reader = tokio_test::io::Builder::new().read(b"GET / HTTP/1.1\r\n").build();
        assert_matches!(read_request(&mut reader).await, Err(HttpError::Incomplete));
    }

    #[tokio::test]
    async fn test_read_request_too_large() {
        let junk = vec![b'a'; MAX_HEADER_BYTES];
        let mut reader = tokio_test::io::Builder::new().read(b"GET /").read(&junk).build();
        assert_matches!(read_request(&mut reader).await, Err(HttpError::TooLarge(_)));
    }

    #[test]
    fn test_redirect_head() {
        let head = Response::redirect("/index.html").head();
        assert!(head.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(head.contains("\r\nLocation: /index.html\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_body_sets_length() {
        let resp = Response::new(Status::Ok).body("text/html", Bytes::from_static(b"<p>hi</p>"));
        let head = resp.head();
        assert!(head.contains("Content-Type: text/html\r\n"));
        assert!(head.contains("Content-Length: 9\r\n"));
    }

    #[tokio::test]
    async fn test_error_page_written() {
        let mut out = Vec::new();
        Response::error(Status::NotFound).write_to(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("404 - Not Found"));
    }
}
