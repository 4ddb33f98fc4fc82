//! # Frame Validation Helpers
//!
//! Integrity and bounds checks shared by the builder and the parser:
//! - `checksum`: CRC16/MODBUS over the covered region of parameter frames
//! - `bounds`: bounds-checked reads so malformed input never panics

pub mod bounds;
pub mod checksum;

pub use bounds::{check_buffer_bounds, read_u16_be, safe_slice};
pub use checksum::{calculate_crc16, verify_crc16, CRC16_MODBUS};
