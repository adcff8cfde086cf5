//! AirTouch 2+ wire protocol definitions
//!
//! Frame layout: 8-byte header, `data_length` payload bytes, 2-byte CRC.
//! Multi-byte fields are big-endian.

use crate::checksum::{checksum_parts, CHECKSUM_LENGTH};
use crate::error::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Sync byte repeated twice at the start of every header
pub const HEADER_MAGIC: u8 = 0x55;

/// Fixed header length in bytes
pub const HEADER_LENGTH: usize = 8;

/// Length of the control/status sub-header
pub const CONTROL_STATUS_SUBHEADER_LENGTH: usize = 8;

/// Length of the extended sub-header
pub const EXTENDED_SUBHEADER_LENGTH: usize = 2;

/// First byte of every extended sub-header
pub const EXTENDED_MARKER: u8 = 0xFF;

/// Header bytes covered by the checksum (everything after the sync magic)
const CHECKSUM_HEADER_OFFSET: usize = 2;

/// Frame addresses
pub mod address {
    /// Client to console, control/status messages
    pub const NORMAL: u16 = 0x80B0;
    /// Client to console, extended messages
    pub const EXTENDED: u16 = 0x90B0;
}

/// Top-level message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ControlStatus,
    Extended,
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            0xC0 => MessageType::ControlStatus,
            0x1F => MessageType::Extended,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::ControlStatus => 0xC0,
            MessageType::Extended => 0x1F,
            MessageType::Unknown(other) => other,
        }
    }
}

impl MessageType {
    /// Address used when the client sends this type of message
    pub fn outbound_address(self) -> u16 {
        match self {
            MessageType::Extended => address::EXTENDED,
            _ => address::NORMAL,
        }
    }
}

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub address: u16,
    pub message_id: u8,
    pub message_type: MessageType,
    pub data_length: u16,
}

impl Header {
    pub fn new(message_type: MessageType, message_id: u8, data_length: u16) -> Self {
        Self {
            address: message_type.outbound_address(),
            message_id,
            message_type,
            data_length,
        }
    }

    /// Parse a header. Only the sync magic is validated; unknown message
    /// types still parse so the frame can be consumed and discarded whole.
    pub fn from_bytes(bytes: &[u8; HEADER_LENGTH]) -> Result<Self, DecodeError> {
        let mut buf = &bytes[..];
        let magic = buf.get_u16();
        if magic != u16::from_be_bytes([HEADER_MAGIC, HEADER_MAGIC]) {
            return Err(DecodeError::BadMagic(magic));
        }
        Ok(Self {
            address: buf.get_u16(),
            message_id: buf.get_u8(),
            message_type: MessageType::from(buf.get_u8()),
            data_length: buf.get_u16(),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LENGTH] {
        let mut out = [0u8; HEADER_LENGTH];
        let mut buf = &mut out[..];
        buf.put_u8(HEADER_MAGIC);
        buf.put_u8(HEADER_MAGIC);
        buf.put_u16(self.address);
        buf.put_u8(self.message_id);
        buf.put_u8(self.message_type.into());
        buf.put_u16(self.data_length);
        out
    }
}

/// Compute the checksum a frame with this header and payload must carry
pub fn frame_checksum(header: &[u8; HEADER_LENGTH], payload: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    checksum_parts(&[&header[CHECKSUM_HEADER_OFFSET..], payload])
}

/// Build a complete frame (header, payload, checksum)
pub fn encode_frame(message_type: MessageType, message_id: u8, payload: &[u8]) -> Bytes {
    let header = Header::new(message_type, message_id, payload.len() as u16).to_bytes();
    let mut frame = BytesMut::with_capacity(HEADER_LENGTH + payload.len() + CHECKSUM_LENGTH);
    frame.put_slice(&header);
    frame.put_slice(payload);
    frame.put_slice(&frame_checksum(&header, payload));
    frame.freeze()
}

/// A checksum-validated frame with its structural metadata stripped
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Bytes,
}

/// Sub-types carried by control/status messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatusSubType {
    GroupControl,
    GroupStatus,
    AcControl,
    AcStatus,
    Unknown(u8),
}

impl From<u8> for ControlStatusSubType {
    fn from(value: u8) -> Self {
        match value {
            0x20 => ControlStatusSubType::GroupControl,
            0x21 => ControlStatusSubType::GroupStatus,
            0x22 => ControlStatusSubType::AcControl,
            0x23 => ControlStatusSubType::AcStatus,
            other => ControlStatusSubType::Unknown(other),
        }
    }
}

impl From<ControlStatusSubType> for u8 {
    fn from(value: ControlStatusSubType) -> Self {
        match value {
            ControlStatusSubType::GroupControl => 0x20,
            ControlStatusSubType::GroupStatus => 0x21,
            ControlStatusSubType::AcControl => 0x22,
            ControlStatusSubType::AcStatus => 0x23,
            ControlStatusSubType::Unknown(other) => other,
        }
    }
}

/// Sizes of the data following a control/status sub-header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubDataLength {
    pub normal: u16,
    pub repeat_count: u16,
    pub repeat_length: u16,
}

impl SubDataLength {
    pub fn total(&self) -> usize {
        self.normal as usize + self.repeat_count as usize * self.repeat_length as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStatusSubHeader {
    pub sub_type: ControlStatusSubType,
    pub subdata_length: SubDataLength,
}

impl ControlStatusSubHeader {
    pub fn new(sub_type: ControlStatusSubType, subdata_length: SubDataLength) -> Self {
        Self {
            sub_type,
            subdata_length,
        }
    }

    /// Consume the sub-header from the front of a payload
    pub fn from_buffer(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, CONTROL_STATUS_SUBHEADER_LENGTH, "control/status sub-header")?;
        let sub_type = ControlStatusSubType::from(buf.get_u8());
        buf.advance(1);
        Ok(Self {
            sub_type,
            subdata_length: SubDataLength {
                normal: buf.get_u16(),
                repeat_count: buf.get_u16(),
                repeat_length: buf.get_u16(),
            },
        })
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.sub_type.into());
        buf.put_u8(0);
        buf.put_u16(self.subdata_length.normal);
        buf.put_u16(self.subdata_length.repeat_count);
        buf.put_u16(self.subdata_length.repeat_length);
    }
}

/// Sub-types carried by extended messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedSubType {
    ErrorInfo,
    Ability,
    GroupName,
    Unknown(u8),
}

impl From<u8> for ExtendedSubType {
    fn from(value: u8) -> Self {
        match value {
            0x10 => ExtendedSubType::ErrorInfo,
            0x11 => ExtendedSubType::Ability,
            0x12 => ExtendedSubType::GroupName,
            other => ExtendedSubType::Unknown(other),
        }
    }
}

impl From<ExtendedSubType> for u8 {
    fn from(value: ExtendedSubType) -> Self {
        match value {
            ExtendedSubType::ErrorInfo => 0x10,
            ExtendedSubType::Ability => 0x11,
            ExtendedSubType::GroupName => 0x12,
            ExtendedSubType::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedSubHeader {
    pub sub_type: ExtendedSubType,
}

impl ExtendedSubHeader {
    pub fn new(sub_type: ExtendedSubType) -> Self {
        Self { sub_type }
    }

    /// Consume the sub-header from the front of a payload
    pub fn from_buffer(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, EXTENDED_SUBHEADER_LENGTH, "extended sub-header")?;
        let marker = buf.get_u8();
        if marker != EXTENDED_MARKER {
            return Err(DecodeError::BadExtendedMarker(marker));
        }
        Ok(Self {
            sub_type: ExtendedSubType::from(buf.get_u8()),
        })
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u8(EXTENDED_MARKER);
        buf.put_u8(self.sub_type.into());
    }
}

pub(crate) fn ensure_remaining(
    buf: &impl Buf,
    needed: usize,
    context: &'static str,
) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            context,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}
