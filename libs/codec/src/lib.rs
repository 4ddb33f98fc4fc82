//! # Lumos Protocol Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the device link: pure functions that frame, parse
//! and checksum the request/response messages exchanged with the LiDAR
//! sensor. Nothing here performs I/O.
//!
//! ## Architecture Role
//!
//! ```text
//! acquisition → [codec] → network
//!      ↑           ↓          ↓
//!   Frames     pack/unpack   Connection
//!   PointSink  CRC16         Transports
//! ```
//!
//! ## What This Crate Contains
//! - [`Frame`] and [`Command`]: the decoded message model
//! - [`pack`]: frame → wire bytes
//! - [`unpack`]: wire bytes → frame, with CRC validation and short-read clamping
//! - CRC16/MODBUS helpers and wire constants
//!
//! ## What This Crate Does NOT Contain
//! - Socket or serial port handling (belongs in `lumos-network`)
//! - Interpretation of scan payloads (belongs in `lumos-acquisition`)
//!
//! ## Example
//!
//! ```rust
//! use lumos_codec::{pack, unpack, Command, Frame};
//!
//! let request = Frame::get_bulk(0, 0, 2400);
//! let bytes = pack(&request).unwrap();
//! assert_eq!(bytes.len(), 13);
//!
//! let decoded = unpack(&bytes).unwrap();
//! assert_eq!(decoded.command, Command::GetBulk);
//! assert_eq!(decoded, request);
//! ```

pub mod builder;
pub mod constants;
pub mod error;
pub mod frame;
pub mod parser;
pub mod validation;

pub use builder::pack;
pub use constants::{RESULT_BLOCK_LEN, RESULT_PRESENT_DATA_TYPE};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Command, Family, Frame, LegacyCommand};
pub use parser::{detect_family, unpack};
pub use validation::checksum::{calculate_crc16, verify_crc16};

/// Total bytes of a SetBulk reply carrying `word_count` words and no result block
pub fn bulk_reply_len(word_count: u16) -> usize {
    usize::from(word_count) * 2 + constants::SET_BULK_OVERHEAD
}
