//! CRC16/MODBUS Checksum Validation
//!
//! Init 0xFFFF, reflected polynomial 0xA001, no final xor. The value is
//! written to the wire low byte first.

use crc::{Crc, CRC_16_MODBUS};

/// Shared table-driven CRC16/MODBUS engine
pub const CRC16_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Calculate the CRC16/MODBUS of a byte slice
pub fn calculate_crc16(data: &[u8]) -> u16 {
    CRC16_MODBUS.checksum(data)
}

/// Verify a region against the checksum carried in a frame
pub fn verify_crc16(data: &[u8], expected: u16) -> bool {
    calculate_crc16(data) == expected
}

/// Append the checksum of `region` to `out` in wire order (low byte first)
pub fn append_crc16(out: &mut Vec<u8>, region_start: usize) -> u16 {
    let crc = calculate_crc16(&out[region_start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    crc
}
