//! Minimal HTTP request model
//!
//! Just enough of HTTP/1.1 to carry an opening handshake: the request line
//! and headers. Bodies are never read.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, Take};

/// Upper bound on the request head
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Upper bound on header count
const MAX_HEADERS: usize = 100;

/// An inbound request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target as sent, query included
    pub target: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
        }
    }

    /// Append a header (builder style)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Target without the query string
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }

    /// Whether the request asks for a WebSocket upgrade at all
    pub fn is_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"))
    }

    /// Read a request head, leaving any following bytes in the reader
    ///
    /// Returns `Ok(None)` if the peer closed before sending anything.
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Option<Request>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut head = reader.take(MAX_HEAD_BYTES as u64);
        let mut line = String::new();
        if read_head_line(&mut head, &mut line).await? == 0 {
            return Ok(None);
        }

        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("malformed request line"));
        };
        let mut request = Request::new(method, target);
        request.version = version.to_string();

        loop {
            if read_head_line(&mut head, &mut line).await? == 0 {
                return Err(closed_inside_head());
            }

            let header = line.trim_end_matches(&['\r', '\n'][..]);
            if header.is_empty() {
                break;
            }
            let Some((name, value)) = header.split_once(':') else {
                return Err(invalid("malformed header line"));
            };
            if request.headers.len() == MAX_HEADERS {
                return Err(invalid("too many headers"));
            }
            request
                .headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
        Ok(Some(request))
    }
}

/// Read one line of the head into `line`, never past the head limit
async fn read_head_line<R>(head: &mut Take<R>, line: &mut String) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = head.read_line(line).await?;
    if line.ends_with('\n') {
        return Ok(n);
    }
    if head.limit() == 0 {
        return Err(invalid("request head too large"));
    }
    if n > 0 {
        return Err(closed_inside_head());
    }
    Ok(0)
}

fn closed_inside_head() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed inside request head",
    )
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_request_head() {
        let raw = b"GET /chat?room=1 HTTP/1.1\r\nHost: example.com\r\nUpgrade: WebSocket\r\n\r\nrest";
        let mut reader = BufReader::new(&raw[..]);
        let request = Request::read_from(&mut reader).await.unwrap().unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.header("HOST"), Some("example.com"));
        assert!(request.is_upgrade());

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "rest");
    }

    #[tokio::test]
    async fn test_empty_stream_yields_none() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(Request::read_from(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_header_rejected() {
        let mut reader = BufReader::new(&b"GET / HTTP/1.1\r\nnot a header\r\n\r\n"[..]);
        let err = Request::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_endless_line_stops_at_head_limit() {
        let mut endless = BufReader::new(tokio::io::repeat(b'a'));
        let err = tokio::time::timeout(Duration::from_secs(2), Request::read_from(&mut endless))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "request head too large");

        let header = (&b"GET / HTTP/1.1\r\nX-Long: "[..]).chain(tokio::io::repeat(b'b'));
        let mut endless = BufReader::new(header);
        let err = tokio::time::timeout(Duration::from_secs(2), Request::read_from(&mut endless))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "request head too large");
    }

    #[tokio::test]
    async fn test_truncated_head_is_unexpected_eof() {
        let mut reader = BufReader::new(&b"GET / HTTP/1.1\r\nHost: exa"[..]);
        let err = Request::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_plain_request_is_not_upgrade() {
        assert!(!Request::new("GET", "/").is_upgrade());
    }
}
