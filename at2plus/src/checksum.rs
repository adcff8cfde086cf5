//! CRC-16/MODBUS frame checksum

use crc::{Crc, CRC_16_MODBUS};

/// Length of the trailing checksum on every frame
pub const CHECKSUM_LENGTH: usize = 2;

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the checksum of `data` as it appears on the wire (big-endian)
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    MODBUS.checksum(data).to_be_bytes()
}

/// Compute the checksum over several slices without concatenating them
pub fn checksum_parts(parts: &[&[u8]]) -> [u8; CHECKSUM_LENGTH] {
    let mut digest = MODBUS.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize().to_be_bytes()
}
