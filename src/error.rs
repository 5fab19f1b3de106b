//! Error types for the WebSocket layer
//!
//! Splits failures by blast radius: handshake errors kill the connection
//! before a session exists, protocol and I/O errors kill one session, and
//! send errors are only reported to the caller.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::frame::CloseCode;

/// Top-level error for connection and session handling
#[derive(Debug, Error)]
pub enum WsError {
    /// Opening handshake rejected (fatal, HTTP 400 sent)
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Wire protocol violation (fatal to the session)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error on the underlying connection (fatal to the session)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Application tried to use a closed session
    #[error("Send error: {0}")]
    Send(#[from] SendError),
}

/// Opening handshake failures (RFC 6455 section 4.2.1)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Request method is not GET
    #[error("method must be GET, got '{0}'")]
    InvalidMethod(String),

    /// A required header is absent
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// Upgrade header is not "websocket"
    #[error("Upgrade header must be 'websocket', got '{0}'")]
    InvalidUpgrade(String),

    /// Connection header does not contain "Upgrade"
    #[error("Connection header must contain 'Upgrade', got '{0}'")]
    InvalidConnection(String),

    /// Sec-WebSocket-Key is not base64 of 16 bytes
    #[error("Sec-WebSocket-Key must be 16 base64-encoded bytes")]
    InvalidKey,

    /// Sec-WebSocket-Version is not 13
    #[error("unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),
}

/// Frame and message level protocol violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// RSV1-3 set without a negotiated extension
    #[error("reserved bits set")]
    ReservedBits,

    /// Opcode outside the RFC 6455 set
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    /// Client sent a frame without a masking key
    #[error("client frame must be masked")]
    UnmaskedFrame,

    /// Server sent a masked frame
    #[error("server frame must not be masked")]
    MaskedFrame,

    /// Close, ping or pong with FIN cleared
    #[error("control frame cannot be fragmented")]
    FragmentedControl,

    /// Control frame payload above 125 bytes
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlTooLarge(usize),

    /// Single frame payload above the configured limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u64, max: usize },

    /// Reassembled message above the configured limit
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Continuation frame with no message in progress
    #[error("continuation frame without an initiating frame")]
    UnexpectedContinuation,

    /// New text/binary frame while a fragmented message is pending
    #[error("data frame received before the previous message finished")]
    InterleavedMessage,

    /// Text message payload is not UTF-8
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Close payload is malformed
    #[error("invalid close frame payload")]
    InvalidClosePayload,
}

impl ProtocolError {
    /// Close code sent to the peer when failing the session with this error
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::InvalidUtf8 => CloseCode::InvalidPayload,
            ProtocolError::FrameTooLarge { .. } | ProtocolError::MessageTooLarge { .. } => {
                CloseCode::TooBig
            }
            _ => CloseCode::Protocol,
        }
    }
}

/// Session send errors
///
/// Occurs when application code writes to a session that is closing or closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The session is closing or closed
    #[error("Session closed")]
    SessionClosed,

    /// Control frame payload above 125 bytes
    #[error("control payload too large: {0} bytes")]
    ControlTooLarge(usize),

    /// The peer is not draining the outbound queue
    #[error("send queue full")]
    QueueFull,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `ServerConfig`
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}
