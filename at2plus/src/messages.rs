//! Typed message payloads
//!
//! Outbound requests implement [`OutboundMessage`]; inbound AC status and
//! AC ability payloads decode into batches.

use crate::aircon::{AcAbility, AcFanSpeed, AcMode, AcPowerState, AcStatus};
use crate::error::DecodeError;
use crate::protocol::{
    ensure_remaining, ControlStatusSubHeader, ControlStatusSubType, ExtendedSubHeader,
    ExtendedSubType, MessageType, SubDataLength,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Minimum length of one AC status repeat entry
pub const AC_STATUS_ENTRY_LENGTH: usize = 8;

/// Minimum length of one AC ability entry after its number/length prefix
pub const AC_ABILITY_ENTRY_LENGTH: usize = 24;

const AC_NAME_LENGTH: usize = 16;

/// A message the client can put on the wire
pub trait OutboundMessage: Send + Sync {
    fn message_type(&self) -> MessageType;
    fn payload(&self) -> Bytes;
    fn name(&self) -> &'static str;
}

/// Empty AC status message; the console answers with the status of every unit
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestAcStatus;

impl OutboundMessage for RequestAcStatus {
    fn message_type(&self) -> MessageType {
        MessageType::ControlStatus
    }

    fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        ControlStatusSubHeader::new(ControlStatusSubType::AcStatus, SubDataLength::default())
            .put(&mut buf);
        buf.freeze()
    }

    fn name(&self) -> &'static str {
        "RequestAcStatus"
    }
}

/// Ask for the ability record of one AC unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestAcAbility {
    pub number: u8,
}

impl RequestAcAbility {
    pub fn new(number: u8) -> Self {
        Self { number }
    }
}

impl OutboundMessage for RequestAcAbility {
    fn message_type(&self) -> MessageType {
        MessageType::Extended
    }

    fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        ExtendedSubHeader::new(ExtendedSubType::Ability).put(&mut buf);
        buf.put_u8(self.number);
        buf.freeze()
    }

    fn name(&self) -> &'static str {
        "RequestAcAbility"
    }
}

/// A batch of AC statuses
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AcStatusMessage {
    pub statuses: Vec<AcStatus>,
}

impl AcStatusMessage {
    /// Decode the sub-data that follows an AC status sub-header
    pub fn decode(subheader: &ControlStatusSubHeader, mut data: Bytes) -> Result<Self, DecodeError> {
        let lengths = subheader.subdata_length;
        ensure_remaining(&data, lengths.total(), "AC status data")?;
        data.advance(lengths.normal as usize);

        let entry_length = lengths.repeat_length as usize;
        if lengths.repeat_count > 0 && entry_length < AC_STATUS_ENTRY_LENGTH {
            return Err(DecodeError::Truncated {
                context: "AC status entry",
                needed: AC_STATUS_ENTRY_LENGTH,
                available: entry_length,
            });
        }

        let statuses = (0..lengths.repeat_count)
            .map(|_| decode_status_entry(data.split_to(entry_length)))
            .collect();
        Ok(Self { statuses })
    }
}

fn decode_status_entry(mut entry: Bytes) -> AcStatus {
    let byte0 = entry.get_u8();
    let byte1 = entry.get_u8();
    let setpoint = entry.get_u8();
    let flags = entry.get_u8();
    let raw_temperature = entry.get_u16() >> 5;
    let error_code = entry.get_u16();
    AcStatus {
        id: byte0 & 0x3F,
        power: AcPowerState::from(byte0 >> 6),
        mode: AcMode::from(byte1 >> 4),
        fan_speed: AcFanSpeed::from(byte1 & 0x0F),
        setpoint,
        spill: flags & 0x02 != 0,
        timer: flags & 0x01 != 0,
        temperature: (raw_temperature as f32 - 500.0) / 10.0,
        error_code,
    }
}

/// A batch of AC abilities
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AcAbilityMessage {
    pub abilities: Vec<AcAbility>,
}

impl AcAbilityMessage {
    /// Decode the data that follows an ability sub-header
    pub fn decode(mut data: Bytes) -> Result<Self, DecodeError> {
        let mut abilities = Vec::new();
        while data.has_remaining() {
            ensure_remaining(&data, 2, "AC ability prefix")?;
            let number = data.get_u8();
            let length = data.get_u8() as usize;
            ensure_remaining(&data, length, "AC ability data")?;
            let entry = data.split_to(length);
            ensure_remaining(&entry, AC_ABILITY_ENTRY_LENGTH, "AC ability entry")?;
            abilities.push(decode_ability_entry(number, entry));
        }
        Ok(Self { abilities })
    }
}

fn decode_ability_entry(number: u8, mut entry: Bytes) -> AcAbility {
    let raw_name = entry.split_to(AC_NAME_LENGTH);
    let name_end = raw_name
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(AC_NAME_LENGTH);
    AcAbility {
        number,
        name: String::from_utf8_lossy(&raw_name[..name_end]).trim().to_string(),
        start_group: entry.get_u8(),
        group_count: entry.get_u8(),
        supported_modes: entry.get_u8(),
        supported_fan_speeds: entry.get_u8(),
        min_cool_setpoint: entry.get_u8(),
        max_cool_setpoint: entry.get_u8(),
        min_heat_setpoint: entry.get_u8(),
        max_heat_setpoint: entry.get_u8(),
    }
}
