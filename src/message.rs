//! Logical messages and fragment reassembly
//!
//! A `Message` is what services see: one text or binary payload, however
//! many frames it took on the wire.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::frame::{Frame, Opcode};

/// A reassembled data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message
    Text(String),
    /// Binary message
    Binary(Bytes),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::Binary(data.into())
    }

    /// Opcode of the initiating frame
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into frames of at most `max_frame_size` payload bytes
    ///
    /// The first frame carries the message opcode, the rest are
    /// continuations, and only the last has FIN set.
    pub fn into_frames(self, max_frame_size: usize) -> Vec<Frame> {
        let opcode = self.opcode();
        let payload = match self {
            Message::Text(text) => Bytes::from(text),
            Message::Binary(data) => data,
        };
        let chunk = max_frame_size.max(1);
        if payload.len() <= chunk {
            return vec![Frame::new(opcode, payload)];
        }

        let mut frames = Vec::with_capacity(payload.len().div_ceil(chunk));
        let mut start = 0;
        while start < payload.len() {
            let end = (start + chunk).min(payload.len());
            let kind = if start == 0 { opcode } else { Opcode::Continuation };
            frames.push(Frame::new(kind, payload.slice(start..end)).with_fin(end == payload.len()));
            start = end;
        }
        frames
    }
}

/// Collects data frames into messages
///
/// Holds at most one partial message; its size is bounded by
/// `max_message_size`.
#[derive(Debug)]
pub struct MessageAssembler {
    max_message_size: usize,
    pending: Option<(Opcode, BytesMut)>,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            pending: None,
        }
    }

    /// Whether a fragmented message is in progress
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one data frame; returns the message once its final frame arrives
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match frame.opcode {
            Opcode::Continuation => {
                let Some((_, buffer)) = self.pending.as_mut() else {
                    return Err(ProtocolError::UnexpectedContinuation);
                };
                let size = buffer.len() + frame.payload.len();
                if size > self.max_message_size {
                    self.pending = None;
                    return Err(ProtocolError::MessageTooLarge {
                        size,
                        max: self.max_message_size,
                    });
                }
                buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                match self.pending.take() {
                    Some((opcode, buffer)) => finish(opcode, buffer.freeze()).map(Some),
                    None => Ok(None),
                }
            }
            Opcode::Text | Opcode::Binary => {
                if self.pending.is_some() {
                    return Err(ProtocolError::InterleavedMessage);
                }
                if frame.payload.len() > self.max_message_size {
                    return Err(ProtocolError::MessageTooLarge {
                        size: frame.payload.len(),
                        max: self.max_message_size,
                    });
                }
                if frame.fin {
                    return finish(frame.opcode, frame.payload).map(Some);
                }
                self.pending = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                Ok(None)
            }
            // control frames never reach the assembler
            Opcode::Close | Opcode::Ping | Opcode::Pong => Ok(None),
        }
    }
}

fn finish(opcode: Opcode, payload: Bytes) -> Result<Message, ProtocolError> {
    if opcode == Opcode::Text {
        let text = String::from_utf8(payload.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Message::Text(text))
    } else {
        Ok(Message::Binary(payload))
    }
}
