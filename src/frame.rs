//! RFC 6455 frame codec
//!
//! Stateless `decode_frame`/`encode_frame` over byte slices, plus
//! `FrameCodec`, a tokio-util codec that keeps the parsed header across
//! reads so a frame whose payload arrives in pieces is not re-parsed.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, WsError};

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcode (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Close, ping and pong
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Continuation, text and binary
    pub const fn is_data(self) -> bool {
        !self.is_control()
    }

    /// Parse the low nibble of the first header byte
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(ProtocolError::InvalidOpcode(value)),
        }
    }
}

/// Which end of the connection is decoding
///
/// Servers require masked inbound frames; clients reject them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// A single protocol unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    pub opcode: Opcode,
    /// Masking key, present on client-to-server frames
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload
    pub payload: Bytes,
}

impl Frame {
    /// Unmasked frame with FIN set
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Close frame carrying the encoded reason
    pub fn close(reason: &CloseReason) -> Self {
        Self::new(Opcode::Close, reason.encode())
    }

    /// Set the FIN bit
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Attach a masking key (client frames)
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }
}

/// Close status codes (RFC 6455 section 7.4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    Protocol,
    /// 1003
    Unsupported,
    /// 1005, never sent on the wire
    NoStatus,
    /// 1006, never sent on the wire
    Abnormal,
    /// 1007
    InvalidPayload,
    /// 1008
    Policy,
    /// 1009
    TooBig,
    /// 1011
    Internal,
    Other(u16),
}

impl CloseCode {
    /// Whether this code may appear in a close frame
    ///
    /// Registered codes 1000-1003 and 1007-1014 plus the 3000-4999
    /// application range; 1004-1006, 1015 and everything else is reserved.
    pub fn is_sendable(self) -> bool {
        match self {
            CloseCode::NoStatus | CloseCode::Abnormal => false,
            CloseCode::Other(code) => matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999),
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::Policy,
            1009 => CloseCode::TooBig,
            1011 => CloseCode::Internal,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::Policy => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::Internal => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

/// Status code plus optional UTF-8 reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub text: String,
}

impl CloseReason {
    /// Build a reason, truncating text so the frame stays within 125 bytes
    pub fn new(code: CloseCode, text: impl Into<String>) -> Self {
        let mut text = text.into();
        let limit = MAX_CONTROL_PAYLOAD - 2;
        if text.len() > limit {
            let mut end = limit;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        Self { code, text }
    }

    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }

    /// Connection dropped without a close handshake
    pub fn abnormal() -> Self {
        Self::new(CloseCode::Abnormal, "")
    }

    /// Reported when the sweep expires an idle or unresponsive session
    pub fn expired() -> Self {
        Self::new(CloseCode::GoingAway, "session expired")
    }

    /// Parse a close frame payload
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        match payload.len() {
            0 => Ok(Self::new(CloseCode::NoStatus, "")),
            1 => Err(ProtocolError::InvalidClosePayload),
            _ => {
                let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_sendable() {
                    return Err(ProtocolError::InvalidClosePayload);
                }
                let text = std::str::from_utf8(&payload[2..])
                    .map_err(|_| ProtocolError::InvalidClosePayload)?;
                Ok(Self {
                    code,
                    text: text.to_string(),
                })
            }
        }
    }

    /// Encode as a close frame payload; unsendable codes encode as empty
    pub fn encode(&self) -> Bytes {
        if !self.code.is_sendable() {
            return Bytes::new();
        }
        let mut buf = BytesMut::with_capacity(2 + self.text.len());
        buf.put_u16(self.code.into());
        buf.put_slice(self.text.as_bytes());
        buf.freeze()
    }
}

/// Result of a stateless decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame and the number of bytes it occupied
    Complete { frame: Frame, consumed: usize },
    /// More bytes are needed; the caller keeps the buffer
    Incomplete,
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    fin: bool,
    opcode: Opcode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
    header_len: usize,
}

fn parse_header(
    src: &[u8],
    role: Role,
    max_payload: usize,
) -> Result<Option<FrameHeader>, ProtocolError> {
    if src.len() < 2 {
        return Ok(None);
    }
    let first = src[0];
    let second = src[1];

    if first & 0x70 != 0 {
        return Err(ProtocolError::ReservedBits);
    }
    let fin = first & 0x80 != 0;
    let opcode = Opcode::from_u8(first & 0x0F)?;
    let masked = second & 0x80 != 0;

    match role {
        Role::Server if !masked => return Err(ProtocolError::UnmaskedFrame),
        Role::Client if masked => return Err(ProtocolError::MaskedFrame),
        _ => {}
    }

    let len7 = second & 0x7F;
    if opcode.is_control() {
        if !fin {
            return Err(ProtocolError::FragmentedControl);
        }
        if usize::from(len7) > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlTooLarge(usize::from(len7)));
        }
    }

    let (payload_len, mut offset) = match len7 {
        126 => {
            if src.len() < 4 {
                return Ok(None);
            }
            (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
        }
        127 => {
            if src.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&src[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        short => (u64::from(short), 2),
    };

    if payload_len > max_payload as u64 {
        return Err(ProtocolError::FrameTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let mask = if masked {
        if src.len() < offset + 4 {
            return Ok(None);
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&src[offset..offset + 4]);
        offset += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        mask,
        payload_len: payload_len as usize,
        header_len: offset,
    }))
}

/// Decode one frame from the front of `src`
pub fn decode_frame(src: &[u8], role: Role, max_payload: usize) -> Result<Decoded, ProtocolError> {
    let Some(header) = parse_header(src, role, max_payload)? else {
        return Ok(Decoded::Incomplete);
    };
    let total = header.header_len + header.payload_len;
    if src.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let mut payload = BytesMut::from(&src[header.header_len..total]);
    if let Some(key) = header.mask {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Complete {
        frame: Frame {
            fin: header.fin,
            opcode: header.opcode,
            mask: header.mask,
            payload: payload.freeze(),
        },
        consumed: total,
    })
}

/// Append the wire form of `frame` to `dst`
///
/// The payload is masked on the wire when the frame carries a key.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let len = frame.payload.len();
    if frame.opcode.is_control() {
        if !frame.fin {
            return Err(ProtocolError::FragmentedControl);
        }
        if len > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlTooLarge(len));
        }
    }

    let mut first = frame.opcode as u8;
    if frame.fin {
        first |= 0x80;
    }
    let mask_bit = if frame.mask.is_some() { 0x80 } else { 0 };

    let extended = if len > 0xFFFF {
        8
    } else if len > 125 {
        2
    } else {
        0
    };
    let mask_len = if frame.mask.is_some() { 4 } else { 0 };
    dst.reserve(2 + extended + mask_len + len);

    dst.put_u8(first);
    if len <= 125 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= 0xFFFF {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match frame.mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(&frame.payload),
    }
    Ok(())
}

/// XOR `payload` in place with the key cycled over 4 bytes
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Incremental frame codec for `FramedRead`/`FramedWrite`
///
/// Once a header is complete it is consumed from the buffer and remembered,
/// so later calls only wait for the payload.
#[derive(Debug)]
pub struct FrameCodec {
    role: Role,
    max_payload: usize,
    pending: Option<FrameHeader>,
}

impl FrameCodec {
    pub fn new(role: Role, max_payload: usize) -> Self {
        Self {
            role,
            max_payload,
            pending: None,
        }
    }

    /// Decoder for client-to-server traffic
    pub fn server(max_payload: usize) -> Self {
        Self::new(Role::Server, max_payload)
    }

    /// Decoder for server-to-client traffic
    pub fn client(max_payload: usize) -> Self {
        Self::new(Role::Client, max_payload)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        let header = match self.pending {
            Some(header) => header,
            None => match parse_header(src, self.role, self.max_payload)? {
                Some(header) => {
                    src.advance(header.header_len);
                    self.pending = Some(header);
                    header
                }
                None => return Ok(None),
            },
        };

        if src.len() < header.payload_len {
            src.reserve(header.payload_len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let mut payload = src.split_to(header.payload_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Ok(Some(Frame {
            fin: header.fin,
            opcode: header.opcode,
            mask: header.mask,
            payload: payload.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        encode_frame(&frame, dst)?;
        Ok(())
    }
}
