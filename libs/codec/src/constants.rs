//! # Protocol Constants
//!
//! Wire-level constants of the device protocol. These values are fixed by
//! the device firmware and must not change.

/// First byte of a legacy single-command frame
pub const LEGACY_MAGIC: u8 = 0xA1;

/// Two-byte prefix of a structured frame
pub const STRUCTURED_MAGIC: [u8; 2] = [0xAA, 0x00];

/// Carriage return terminating every frame
pub const FRAME_TERMINATOR: u8 = 0x0D;

/// Size of the telemetry block trailing a bulk payload
pub const RESULT_BLOCK_LEN: usize = 20;

/// `dataType` value marking a bulk frame that carries a result block
pub const RESULT_PRESENT_DATA_TYPE: u16 = 4;

/// Length of an encoded legacy frame (magic, command, CR)
pub const LEGACY_FRAME_LEN: usize = 3;

/// Offset of the big-endian length field in structured frames
pub const LENGTH_FIELD_OFFSET: usize = 4;

/// Offset of the first 16-bit field after the length field
pub const FIELDS_OFFSET: usize = 6;

/// Header bytes before a parameter payload (magic, sub-command, length, three fields)
pub const PARAM_HEADER_LEN: usize = 12;

/// Header bytes before a bulk payload (magic, sub-command, length, two fields)
pub const SET_BULK_HEADER_LEN: usize = 10;

/// Size of the CRC16 trailer
pub const CRC_LEN: usize = 2;

/// Length-field base values per structured sub-command
pub mod length_base {
    pub const GET_PARAM: u16 = 7;
    pub const SET_PARAM: u16 = 7;
    pub const GET_BULK: u16 = 6;
    pub const SET_BULK: u16 = 5;
    /// Added to the SetBulk length field when a result block follows the payload
    pub const RESULT_BLOCK: u16 = 10;
}

/// Minimum buffer sizes accepted by the decoder
pub mod min_len {
    pub const LEGACY: usize = 3;
    pub const GET_PARAM: usize = 14;
    /// Plus two bytes per payload word
    pub const SET_PARAM: usize = 14;
    pub const GET_BULK: usize = 12;
    pub const SET_BULK: usize = 10;
}

/// Bytes a SetBulk reply spends outside its payload when no result block is present
pub const SET_BULK_OVERHEAD: usize = SET_BULK_HEADER_LEN + 1;
