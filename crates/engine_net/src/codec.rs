//! Binary frame codec.
//!
//! Every CRDT operation travels as one self-delimiting frame of big-endian
//! `u32` fields followed by the value bytes:
//!
//! ```text
//! frame := length | messageType | entityId | componentId | timestamp | dataLength | data[dataLength]
//! ```
//!
//! `length` counts the whole frame, itself included, so
//! `length == HEADER_LEN + dataLength`. Delete frames carry no data and
//! `DELETE_ENTITY` frames carry zero component and timestamp fields.
//! Frames are concatenated without separators; [`FrameReader`] reassembles
//! them from arbitrarily split chunks.

use engine_component::{ComponentId, Entity};

use crate::error::ProtocolDecodeError;
use crate::messages::{CrdtMessage, MessageType};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 24;

/// Default maximum accepted frame length (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 1 << 20;

/// Append the frame for `message` to `buf`.
pub fn encode_into(message: &CrdtMessage, buf: &mut Vec<u8>) {
    let component = message.component().map_or(0, |c| c.0);
    let data = message.data().unwrap_or_default();
    let length = (HEADER_LEN + data.len()) as u32;

    buf.reserve(length as usize);
    for field in [
        length,
        message.message_type() as u32,
        message.entity().id(),
        component,
        message.timestamp(),
        data.len() as u32,
    ] {
        buf.extend_from_slice(&field.to_be_bytes());
    }
    buf.extend_from_slice(data);
}

/// Encode `message` as a standalone frame.
#[must_use]
pub fn encode(message: &CrdtMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(message, &mut buf);
    buf
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(word)
}

/// Decode the frame at the start of `bytes`.
///
/// Returns the message and the number of bytes consumed.
///
/// # Errors
///
/// Returns a [`ProtocolDecodeError`] if the frame is incomplete or malformed.
pub fn decode(bytes: &[u8]) -> Result<(CrdtMessage, usize), ProtocolDecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolDecodeError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }
    let length = read_u32(bytes, 0);
    if (length as usize) < HEADER_LEN {
        return Err(ProtocolDecodeError::InvalidLength(length));
    }
    if bytes.len() < length as usize {
        return Err(ProtocolDecodeError::Truncated {
            needed: length as usize,
            available: bytes.len(),
        });
    }

    let raw_type = read_u32(bytes, 4);
    let message_type =
        MessageType::try_from(raw_type).map_err(ProtocolDecodeError::UnknownMessageType)?;
    let entity = Entity::from_raw(read_u32(bytes, 8));
    let component = ComponentId(read_u32(bytes, 12));
    let timestamp = read_u32(bytes, 16);
    let data_length = read_u32(bytes, 20);

    if HEADER_LEN as u64 + u64::from(data_length) != u64::from(length) {
        return Err(ProtocolDecodeError::DataLengthMismatch {
            length,
            data_length,
        });
    }
    let data = &bytes[HEADER_LEN..length as usize];

    let message = match message_type {
        MessageType::PutComponent => CrdtMessage::PutComponent {
            entity,
            component,
            timestamp,
            data: data.to_vec(),
        },
        MessageType::AppendValue => CrdtMessage::AppendValue {
            entity,
            component,
            timestamp,
            data: data.to_vec(),
        },
        MessageType::DeleteComponent => {
            require_zero("dataLength", data_length, message_type)?;
            CrdtMessage::DeleteComponent {
                entity,
                component,
                timestamp,
            }
        }
        MessageType::DeleteEntity => {
            require_zero("componentId", component.0, message_type)?;
            require_zero("timestamp", timestamp, message_type)?;
            require_zero("dataLength", data_length, message_type)?;
            CrdtMessage::DeleteEntity { entity }
        }
    };
    Ok((message, length as usize))
}

fn require_zero(
    field: &'static str,
    value: u32,
    message_type: MessageType,
) -> Result<(), ProtocolDecodeError> {
    if value == 0 {
        Ok(())
    } else {
        Err(ProtocolDecodeError::NonZeroField {
            field,
            message_type: message_type.as_str(),
        })
    }
}

/// Reassembles frames from a stream of byte chunks.
///
/// A frame is decoded only once all of its bytes are buffered. A frame that
/// is complete but malformed is skipped on its own. A frame whose `length`
/// exceeds the limit is skipped byte for byte, including the part that has
/// not arrived yet. A `length` shorter than a header makes the remaining
/// bytes unframeable, so the buffer is discarded.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    cursor: usize,
    /// Bytes of an oversized frame still to be dropped from future chunks.
    skip_remaining: usize,
    max_frame_len: u32,
}

impl FrameReader {
    /// Create a reader accepting frames up to `max_frame_len` bytes.
    #[must_use]
    pub fn new(max_frame_len: u32) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            skip_remaining: 0,
            max_frame_len,
        }
    }

    /// Buffer an inbound chunk.
    pub fn extend(&mut self, mut chunk: &[u8]) {
        if self.skip_remaining > 0 {
            let skipped = self.skip_remaining.min(chunk.len());
            self.skip_remaining -= skipped;
            chunk = &chunk[skipped..];
        }
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes of an oversized frame that will be dropped from later chunks.
    #[must_use]
    pub fn skipping(&self) -> usize {
        self.skip_remaining
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Result<CrdtMessage, ProtocolDecodeError>> {
        let pending = &self.buffer[self.cursor..];
        if pending.len() < 4 {
            return None;
        }
        let length = read_u32(pending, 0);
        if (length as usize) < HEADER_LEN {
            self.discard();
            return Some(Err(ProtocolDecodeError::InvalidLength(length)));
        }
        if length > self.max_frame_len {
            let buffered = pending.len().min(length as usize);
            self.cursor += buffered;
            self.skip_remaining = length as usize - buffered;
            return Some(Err(ProtocolDecodeError::FrameTooLarge {
                length,
                max: self.max_frame_len,
            }));
        }
        if pending.len() < length as usize {
            return None;
        }
        let result = decode(&pending[..length as usize]).map(|(message, _)| message);
        self.cursor += length as usize;
        Some(result)
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Iterator for FrameReader {
    type Item = Result<CrdtMessage, ProtocolDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}
