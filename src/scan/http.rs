//! Minimal HTTP/1.1 framing for the Unix socket transport.
//!
//! Only what `/checkv2` needs: one POST out, one response in. The response
//! body is framed by `Content-Length`, chunked transfer encoding, or the
//! daemon closing the connection, in that order of preference.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::TransportError;
use crate::scan::endpoint::Endpoint;

/// Rspamd scan resource.
pub const CHECK_PATH: &str = "/checkv2";

/// `User-Agent` sent with every scan.
pub const USER_AGENT: &str = concat!("mailscan-helper/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the response head (status line plus headers).
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on a response body.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A message to scan plus the caller's extra request headers.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub message: Vec<u8>,
    pub extra_headers: Vec<(String, String)>,
}

impl ScanRequest {
    pub fn new(message: impl Into<Vec<u8>>) -> Self {
        Self {
            message: message.into(),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers.extend(headers);
        self
    }
}

/// Status and body of a daemon response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Fixed headers every scan carries, before `Content-Length`.
pub fn base_headers(endpoint: &Endpoint) -> Vec<(String, String)> {
    vec![
        ("Host".into(), endpoint.host_header()),
        ("Accept-Encoding".into(), "identity".into()),
        ("User-Agent".into(), USER_AGENT.into()),
        (
            "Content-Type".into(),
            "application/x-www-form-urlencoded".into(),
        ),
    ]
}

/// Serialise a complete request: request line, headers, blank line, body.
pub fn encode_request(endpoint: &Endpoint, request: &ScanRequest) -> Vec<u8> {
    let mut head = format!("POST {CHECK_PATH} HTTP/1.1\r\n");

    let content_length = ("Content-Length".to_string(), request.message.len().to_string());
    let headers = base_headers(endpoint)
        .into_iter()
        .chain(std::iter::once(content_length))
        .chain(request.extra_headers.iter().cloned());

    for (name, value) in headers {
        head.push_str(name.trim());
        head.push_str(": ");
        head.push_str(&header_value(&value));
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(&request.message);
    bytes
}

/// Strip characters that would break header framing.
pub(crate) fn header_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Read one HTTP response.
///
/// A connection that closes before sending anything is reported as
/// [`TransportError::EmptyReply`].
pub async fn read_response<R>(reader: R) -> Result<HttpResponse, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut head_bytes = 0usize;

    let status_line = read_head_line(&mut reader, &mut head_bytes).await?;
    let Some(status_line) = status_line else {
        return Err(TransportError::EmptyReply);
    };
    let status = parse_status_line(&status_line)?;

    let mut content_length: Option<usize> = None;
    let mut chunked = false;

    loop {
        let line = read_head_line(&mut reader, &mut head_bytes)
            .await?
            .ok_or_else(|| TransportError::MalformedResponse("truncated headers".into()))?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(TransportError::MalformedResponse(format!(
                "bad header line: {line}"
            )));
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-length") {
            let len = value.parse::<usize>().map_err(|_| {
                TransportError::MalformedResponse(format!("bad Content-Length: {value}"))
            })?;
            content_length = Some(len);
        } else if name.trim().eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            chunked = true;
        }
    }

    let body = if chunked {
        read_chunked(&mut reader).await?
    } else if let Some(len) = content_length {
        if len > MAX_BODY_BYTES {
            return Err(TransportError::MalformedResponse(format!(
                "body of {len} bytes exceeds limit"
            )));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        body
    } else {
        let mut body = Vec::new();
        (&mut reader)
            .take(MAX_BODY_BYTES as u64 + 1)
            .read_to_end(&mut body)
            .await?;
        if body.len() > MAX_BODY_BYTES {
            return Err(TransportError::MalformedResponse(
                "body exceeds limit".into(),
            ));
        }
        body
    };

    Ok(HttpResponse { status, body })
}

/// Read a CRLF- or LF-terminated line; `None` on clean EOF before any byte.
async fn read_head_line<R>(
    reader: &mut BufReader<R>,
    head_bytes: &mut usize,
) -> Result<Option<String>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    *head_bytes += n;
    if *head_bytes > MAX_HEAD_BYTES {
        return Err(TransportError::MalformedResponse(
            "response head too large".into(),
        ));
    }
    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

fn parse_status_line(line: &str) -> Result<u16, TransportError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| TransportError::MalformedResponse(format!("bad status line: {line}"))),
        _ => Err(TransportError::MalformedResponse(format!(
            "bad status line: {line}"
        ))),
    }
}

async fn read_chunked<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        if reader.read_line(&mut size_line).await? == 0 {
            return Err(TransportError::MalformedResponse(
                "truncated chunked body".into(),
            ));
        }
        let size_field = size_line.trim().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size_field, 16).map_err(|_| {
            TransportError::MalformedResponse(format!("bad chunk size: {size_field}"))
        })?;

        if size == 0 {
            // Trailers, if any, end with a blank line.
            loop {
                let mut trailer = String::new();
                let n = reader.read_line(&mut trailer).await?;
                if n == 0 || trailer.trim().is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        if body.len() + size > MAX_BODY_BYTES {
            return Err(TransportError::MalformedResponse(
                "chunked body exceeds limit".into(),
            ));
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(TransportError::MalformedResponse(
                "missing chunk terminator".into(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unix_endpoint() -> Endpoint {
        Endpoint::Unix(PathBuf::from("/tmp/drweb.socket"))
    }

    #[test]
    fn encodes_request_with_extra_headers() {
        let request = ScanRequest::new(b"Subject: hi\r\n\r\nbody".to_vec()).with_headers(vec![
            ("From".into(), "a@x.com".into()),
            ("Rcpt".into(), "b@y.com".into()),
            ("Rcpt".into(), "c@z.com".into()),
        ]);
        let bytes = encode_request(&unix_endpoint(), &request);
        let text = String::from_utf8(bytes).unwrap();

        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let lines: Vec<&str> = head.split("\r\n").collect();
        assert_eq!(lines[0], "POST /checkv2 HTTP/1.1");
        assert_eq!(lines[1], "Host: /tmp/drweb.socket");
        assert_eq!(lines[2], "Accept-Encoding: identity");
        assert!(lines[3].starts_with("User-Agent: mailscan-helper/"));
        assert_eq!(lines[4], "Content-Type: application/x-www-form-urlencoded");
        assert_eq!(lines[5], "Content-Length: 19");
        assert_eq!(&lines[6..], ["From: a@x.com", "Rcpt: b@y.com", "Rcpt: c@z.com"]);
        assert_eq!(body, "Subject: hi\r\n\r\nbody");
    }

    #[test]
    fn header_values_cannot_inject_lines() {
        assert_eq!(header_value("a@x.com\r\nX-Evil: 1"), "a@x.comX-Evil: 1");
    }

    #[tokio::test]
    async fn reads_content_length_body() {
        let raw: &[u8] =
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"score\":1.0}trailing";
        let response = read_response(raw).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{\"score\":1.0}");
    }

    #[tokio::test]
    async fn reads_until_close_without_length() {
        let raw: &[u8] = b"HTTP/1.0 200 OK\r\nServer: rspamd\r\n\r\n{\"score\":2}";
        let response = read_response(raw).await.unwrap();
        assert_eq!(response.body, b"{\"score\":2}");
    }

    #[tokio::test]
    async fn reads_chunked_body() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\n{\"sco\r\n7;ext=1\r\nre\":3}\n\r\n0\r\n\r\n";
        let response = read_response(raw).await.unwrap();
        assert_eq!(response.body, b"{\"score\":3}\n");
    }

    #[tokio::test]
    async fn large_body_is_not_truncated() {
        let payload = format!("{{\"pad\":\"{}\"}}", "x".repeat(20_000));
        let raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{payload}",
            payload.len()
        );
        let response = read_response(raw.as_bytes()).await.unwrap();
        assert_eq!(response.body.len(), payload.len());
    }

    #[tokio::test]
    async fn empty_connection_is_empty_reply() {
        let raw: &[u8] = b"";
        assert!(matches!(
            read_response(raw).await,
            Err(TransportError::EmptyReply)
        ));
    }

    #[tokio::test]
    async fn garbage_status_line_is_malformed() {
        let raw: &[u8] = b"{\"score\":1}\r\n\r\n";
        assert!(matches!(
            read_response(raw).await,
            Err(TransportError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn truncated_content_length_is_an_error() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\n{}";
        assert!(matches!(read_response(raw).await, Err(TransportError::Io(_))));
    }
}
