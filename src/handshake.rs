//! Opening handshake validation (RFC 6455 section 4.2)
//!
//! ```http
//! GET /chat HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! Nothing here touches the network; callers write the bytes produced by
//! `Handshake::response` or `reject`.

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;
use crate::http::Request;

/// Fixed GUID appended to the client key
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version accepted
pub const SUPPORTED_VERSION: &str = "13";

/// base64(SHA-1(key + GUID))
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Value for Sec-WebSocket-Accept
    pub accept_key: String,
    /// Echoed Sec-WebSocket-Protocol, if the client offered one
    pub protocol: Option<String>,
}

impl Handshake {
    /// The HTTP 101 response head
    pub fn response(&self) -> Vec<u8> {
        let mut response = String::from(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n",
        );
        response.push_str("Sec-WebSocket-Accept: ");
        response.push_str(&self.accept_key);
        response.push_str("\r\n");
        if let Some(protocol) = &self.protocol {
            response.push_str("Sec-WebSocket-Protocol: ");
            response.push_str(protocol);
            response.push_str("\r\n");
        }
        response.push_str("\r\n");
        response.into_bytes()
    }
}

/// Check `request` against the opening handshake requirements
pub fn validate(request: &Request) -> Result<Handshake, HandshakeError> {
    if request.method != "GET" {
        return Err(HandshakeError::InvalidMethod(request.method.clone()));
    }

    let upgrade = request
        .header("upgrade")
        .ok_or(HandshakeError::MissingHeader("Upgrade"))?;
    if !upgrade.trim().eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::InvalidUpgrade(upgrade.to_string()));
    }

    let connection = request
        .header("connection")
        .ok_or(HandshakeError::MissingHeader("Connection"))?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(HandshakeError::InvalidConnection(connection.to_string()));
    }

    let key = request
        .header("sec-websocket-key")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?
        .trim();
    match base64::engine::general_purpose::STANDARD.decode(key) {
        Ok(decoded) if decoded.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }

    let version = request
        .header("sec-websocket-version")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Version"))?
        .trim();
    if version != SUPPORTED_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version.to_string()));
    }

    let protocol = request
        .header("sec-websocket-protocol")
        .and_then(|offered| offered.split(',').map(str::trim).find(|p| !p.is_empty()))
        .map(str::to_string);

    Ok(Handshake {
        accept_key: compute_accept_key(key),
        protocol,
    })
}

/// HTTP 400 response for a failed handshake
pub fn reject(error: &HandshakeError) -> Vec<u8> {
    let body = error.to_string();
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Connection: close\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_request() -> Request {
        Request::new("GET", "/chat")
            .with_header("Host", "server.example.com")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "keep-alive, Upgrade")
            .with_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .with_header("Sec-WebSocket-Version", "13")
    }

    #[test]
    fn test_rfc_sample_accept_key() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        let handshake = validate(&handshake_request()).unwrap();
        assert_eq!(handshake.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(handshake.protocol, None);
    }

    #[test]
    fn test_response_head() {
        let handshake = validate(&handshake_request()).unwrap();
        let response = String::from_utf8(handshake.response()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let request = Request::new("GET", "/")
            .with_header("upgrade", "WebSocket")
            .with_header("CONNECTION", "upgrade")
            .with_header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .with_header("SEC-WEBSOCKET-VERSION", "13");
        assert!(validate(&request).is_ok());
    }

    #[test]
    fn test_protocol_is_echoed() {
        let request = handshake_request().with_header("Sec-WebSocket-Protocol", "chat, superchat");
        assert_eq!(validate(&request).unwrap().protocol.as_deref(), Some("chat"));
    }

    #[test]
    fn test_malformed_requests() {
        let mut post = handshake_request();
        post.method = "POST".into();

        let cases: Vec<(Request, HandshakeError)> = vec![
            (post, HandshakeError::InvalidMethod("POST".into())),
            (
                Request::new("GET", "/")
                    .with_header("Connection", "Upgrade")
                    .with_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .with_header("Sec-WebSocket-Version", "13"),
                HandshakeError::MissingHeader("Upgrade"),
            ),
            (
                Request::new("GET", "/")
                    .with_header("Upgrade", "h2c")
                    .with_header("Connection", "Upgrade"),
                HandshakeError::InvalidUpgrade("h2c".into()),
            ),
            (
                Request::new("GET", "/")
                    .with_header("Upgrade", "websocket")
                    .with_header("Connection", "keep-alive"),
                HandshakeError::InvalidConnection("keep-alive".into()),
            ),
            (
                Request::new("GET", "/")
                    .with_header("Upgrade", "websocket")
                    .with_header("Connection", "Upgrade")
                    .with_header("Sec-WebSocket-Key", "c2hvcnQ=")
                    .with_header("Sec-WebSocket-Version", "13"),
                HandshakeError::InvalidKey,
            ),
            (
                Request::new("GET", "/")
                    .with_header("Upgrade", "websocket")
                    .with_header("Connection", "Upgrade")
                    .with_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .with_header("Sec-WebSocket-Version", "8"),
                HandshakeError::UnsupportedVersion("8".into()),
            ),
        ];

        for (request, expected) in cases {
            assert_eq!(validate(&request), Err(expected));
        }
    }

    #[test]
    fn test_reject_is_400() {
        let response = String::from_utf8(reject(&HandshakeError::InvalidKey)).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("Sec-WebSocket-Key must be 16 base64-encoded bytes"));
    }
}
