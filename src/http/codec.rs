//! HTTP/1.x wire codec.
//!
//! # Responsibilities
//! - Read exactly one request (head and body) from a buffered stream
//! - Serialize one response onto a stream
//! - Enforce header and body size limits while reading
//!
//! # Design Decisions
//! - Header parsing delegated to `httparse`
//! - Bodies are fully buffered (`Content-Length` or chunked)
//! - A clean end of stream before the first byte of a request is `Ok(None)`,
//!   not an error
//! - No pipelining: the caller reads the next request only after writing the
//!   previous response

use axum::body::Bytes;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::LimitsConfig;
use crate::http::request::has_token;
use crate::http::{Request, Response};

const MAX_HEADERS: usize = 64;

/// Transport-level failure while reading or writing HTTP messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed mid-request")]
    UnexpectedEof,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request head exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Read one request from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between requests.
pub async fn read_request<R>(reader: &mut R, limits: &LimitsConfig) -> Result<Option<Request>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let head = match read_head(reader, limits.max_header_bytes).await? {
        Some(head) => head,
        None => return Ok(None),
    };

    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut storage);
    if parsed.parse(&head)?.is_partial() {
        return Err(CodecError::UnexpectedEof);
    }

    let method = parsed
        .method
        .ok_or_else(|| CodecError::Invalid("missing method".into()))
        .and_then(|m| Method::from_bytes(m.as_bytes()).map_err(|e| CodecError::Invalid(e.to_string())))?;
    let uri: Uri = parsed
        .path
        .ok_or_else(|| CodecError::Invalid("missing target".into()))?
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| CodecError::Invalid(e.to_string()))?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = axum::http::Request::builder().method(method).uri(uri).version(version);
    for h in parsed.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|e| CodecError::Invalid(e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|e| CodecError::Invalid(e.to_string()))?;
        builder = builder.header(name, value);
    }
    let mut request = builder
        .body(Bytes::new())
        .map_err(|e| CodecError::Invalid(e.to_string()))?;

    let body = if has_token(request.headers(), header::TRANSFER_ENCODING, "chunked") {
        read_chunked(reader, limits).await?
    } else if let Some(len) = content_length(&request)? {
        if len > limits.max_body_bytes {
            return Err(CodecError::BodyTooLarge { limit: limits.max_body_bytes });
        }
        let mut body = vec![0; len];
        reader.read_exact(&mut body).await.map_err(eof_as_truncation)?;
        body
    } else {
        Vec::new()
    };
    *request.body_mut() = Bytes::from(body);

    Ok(Some(request))
}

/// Serialize `res` onto `writer` and flush.
pub async fn write_response<W>(writer: &mut W, res: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let status = res.status();
    let version = if res.version() == Version::HTTP_10 { "HTTP/1.0" } else { "HTTP/1.1" };

    let mut head = format!(
        "{version} {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in res.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if carries_body(status) && !res.headers().contains_key(header::CONTENT_LENGTH) {
        head.extend_from_slice(format!("content-length: {}\r\n", res.body().len()).as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    writer.write_all(&head).await?;
    if carries_body(status) && !res.body().is_empty() {
        writer.write_all(res.body()).await?;
    }
    writer.flush().await
}

/// Read header lines up to and including the blank line.
async fn read_head<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let budget = (limit + 1).saturating_sub(head.len()) as u64;
        let start = head.len();
        let n = (&mut *reader).take(budget).read_until(b'\n', &mut head).await?;

        if n == 0 {
            return if head.is_empty() { Ok(None) } else { Err(CodecError::UnexpectedEof) };
        }
        if head.len() > limit {
            return Err(CodecError::HeadersTooLarge { limit });
        }
        if !head.ends_with(b"\n") {
            return Err(CodecError::UnexpectedEof);
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // Stray CRLF between requests.
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
    }
}

async fn read_chunked<R>(reader: &mut R, limits: &LimitsConfig) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let limit = limits.max_body_bytes;
    let mut body = Vec::new();
    let mut line = Vec::new();
    loop {
        if read_line_bounded(reader, &mut line, limits.max_header_bytes).await? == 0 {
            return Err(CodecError::UnexpectedEof);
        }
        let text = std::str::from_utf8(&line).map_err(|e| CodecError::Invalid(e.to_string()))?;
        let size_field = text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| CodecError::Invalid(format!("bad chunk size `{size_field}`")))?;

        if size == 0 {
            // Discard trailers up to the terminating blank line.
            loop {
                let n = read_line_bounded(reader, &mut line, limits.max_header_bytes).await?;
                if n == 0 || line.trim_ascii().is_empty() {
                    return Ok(body);
                }
            }
        }

        let start = body.len();
        let end = start
            .checked_add(size)
            .filter(|end| *end <= limit)
            .ok_or(CodecError::BodyTooLarge { limit })?;
        body.resize(end, 0);
        reader.read_exact(&mut body[start..]).await.map_err(eof_as_truncation)?;

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await.map_err(eof_as_truncation)?;
        if &crlf != b"\r\n" {
            return Err(CodecError::Invalid("chunk not terminated by CRLF".into()));
        }
    }
}

/// Read one line of at most `limit` bytes into `line`, replacing its contents.
async fn read_line_bounded<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> Result<usize, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader).take(limit as u64 + 1).read_until(b'\n', line).await?;
    if n > limit {
        return Err(CodecError::HeadersTooLarge { limit });
    }
    Ok(n)
}

fn content_length(req: &Request) -> Result<Option<usize>, CodecError> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| CodecError::Invalid("bad content-length".into()))
        })
        .transpose()
}

fn carries_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

fn eof_as_truncation(err: std::io::Error) -> CodecError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        CodecError::UnexpectedEof
    } else {
        CodecError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestExt;
    use tokio::io::BufReader;

    async fn parse(raw: &[u8]) -> Result<Option<Request>, CodecError> {
        let mut reader = BufReader::new(raw);
        read_request(&mut reader, &LimitsConfig::default()).await
    }

    #[tokio::test]
    async fn reads_request_with_content_length() {
        let req = parse(b"POST /test?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/test");
        assert_eq!(req.target(), "/test?x=1");
        assert_eq!(req.version(), Version::HTTP_11);
        assert_eq!(&req.body()[..], b"hello");
    }

    #[tokio::test]
    async fn reads_chunked_body() {
        let raw = b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let req = parse(raw).await.unwrap().unwrap();
        assert_eq!(&req.body()[..], b"Wikipedia");
    }

    #[tokio::test]
    async fn sequential_requests_share_a_reader() {
        let raw: &[u8] = b"GET /a HTTP/1.1\r\n\r\n\r\nGET /b HTTP/1.0\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let limits = LimitsConfig::default();

        let first = read_request(&mut reader, &limits).await.unwrap().unwrap();
        let second = read_request(&mut reader, &limits).await.unwrap().unwrap();
        assert_eq!(first.path(), "/a");
        assert_eq!(second.path(), "/b");
        assert_eq!(second.version(), Version::HTTP_10);
        assert!(read_request(&mut reader, &limits).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_head_is_an_error() {
        let err = parse(b"GET / HTTP/1.1\r\nHost: a\r\n").await.unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let err = parse(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").await.unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof));
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let limits = LimitsConfig {
            max_header_bytes: 32,
            ..LimitsConfig::default()
        };
        let raw: &[u8] = b"GET / HTTP/1.1\r\nX-Padding: aaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let err = read_request(&mut reader, &limits).await.unwrap_err();
        assert!(matches!(err, CodecError::HeadersTooLarge { limit: 32 }));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let limits = LimitsConfig {
            max_body_bytes: 4,
            ..LimitsConfig::default()
        };
        let raw: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(raw);
        let err = read_request(&mut reader, &limits).await.unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn huge_chunk_size_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\nfffffffffffffffd\r\n";
        let err = parse(raw).await.unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge { .. }));
    }

    #[tokio::test]
    async fn chunked_body_over_limit_is_rejected() {
        let limits = LimitsConfig {
            max_body_bytes: 8,
            ..LimitsConfig::default()
        };
        let raw: &[u8] = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let err = read_request(&mut reader, &limits).await.unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn long_chunk_line_is_rejected() {
        let limits = LimitsConfig {
            max_header_bytes: 64,
            ..LimitsConfig::default()
        };
        let mut raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5;".to_vec();
        raw.extend(std::iter::repeat(b'x').take(200));
        raw.extend_from_slice(b"\r\nhello\r\n0\r\n\r\n");
        let mut reader = BufReader::new(&raw[..]);
        let err = read_request(&mut reader, &limits).await.unwrap_err();
        assert!(matches!(err, CodecError::HeadersTooLarge { limit: 64 }));
    }

    #[tokio::test]
    async fn writes_status_headers_and_length() {
        let mut res = Response::new(Bytes::from_static(b"ok\n"));
        res.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let mut out = Vec::new();
        write_response(&mut out, &res).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("content-length: 3\r\n"));
        assert!(text.ends_with("\r\n\r\nok\n"));
    }

    #[tokio::test]
    async fn switching_protocols_has_no_body_framing() {
        let mut res = Response::new(Bytes::new());
        *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

        let mut out = Vec::new();
        write_response(&mut out, &res).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text, "HTTP/1.1 101 Switching Protocols\r\n\r\n");
    }
}
