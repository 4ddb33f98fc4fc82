//! Protocol-level errors for device frame processing
//!
//! Every rejection carries enough context to tell a framing problem
//! (short read, wrong magic) apart from corruption (CRC mismatch) or a
//! caller mistake while building a frame.

use thiserror::Error;

/// Frame encoding/decoding errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is too small to contain the frame it claims to be
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// First byte(s) select no known frame family
    #[error("Invalid magic: got {actual:#04x} at offset {offset} (indicates: {diagnosis})")]
    InvalidMagic {
        actual: u8,
        offset: usize,
        diagnosis: String,
    },

    /// Legacy command byte is not one of V, Q, S, A-D
    #[error("Unknown legacy command byte {byte:#04x} ({printable:?})")]
    UnknownCommand { byte: u8, printable: char },

    /// Structured sub-command is not one of MB, AE, GA, GB
    #[error("Unknown structured sub-command {code:?} (bytes: {hex})")]
    UnknownSubCommand { code: String, hex: String },

    /// CRC16 over the covered region does not match the trailer
    #[error("Checksum mismatch: frame carries {expected:#06x}, calculated {calculated:#06x} (covered: {covered} bytes, cause: {likely_cause})")]
    ChecksumMismatch {
        expected: u16,
        calculated: u16,
        covered: usize,
        likely_cause: String,
    },

    /// Payload length must be a whole number of 16-bit words
    #[error("Odd payload length {len}: payloads are sequences of 16-bit words")]
    OddPayload { len: usize },

    /// Payload does not fit the 16-bit length or word-count fields
    #[error("Payload too large: {words} words exceeds limit {limit} for {command}")]
    PayloadTooLarge {
        words: usize,
        limit: usize,
        command: &'static str,
    },

    /// Frame carries a section the command does not define
    #[error("{command} frames do not carry a {section}")]
    UnexpectedSection {
        command: &'static str,
        section: &'static str,
    },
}

/// Result type for codec operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Create MessageTooSmall error with diagnostic context
    pub fn message_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    /// Create InvalidMagic error with a best-effort diagnosis
    pub fn invalid_magic(actual: u8, offset: usize) -> Self {
        let diagnosis = match actual {
            0x00 => "uninitialized buffer or stale bytes",
            0xFF => "line noise or corrupted buffer",
            0x0D => "trailing CR of a previous frame",
            _ => "not a frame start, stream out of sync",
        };

        Self::InvalidMagic {
            actual,
            offset,
            diagnosis: diagnosis.to_string(),
        }
    }

    pub fn unknown_command(byte: u8) -> Self {
        let printable = if byte.is_ascii_graphic() {
            byte as char
        } else {
            '?'
        };
        Self::UnknownCommand { byte, printable }
    }

    pub fn unknown_sub_command(code: [u8; 2]) -> Self {
        Self::UnknownSubCommand {
            code: String::from_utf8_lossy(&code).into_owned(),
            hex: hex::encode(code),
        }
    }

    /// Create ChecksumMismatch error with diagnostic context
    pub fn checksum_mismatch(expected: u16, calculated: u16, covered: usize) -> Self {
        let likely_cause = if expected == 0 {
            "frame sent without checksum calculation"
        } else if expected.swap_bytes() == calculated {
            "checksum byte order (endianness) mismatch"
        } else {
            "data corruption during transmission"
        };

        Self::ChecksumMismatch {
            expected,
            calculated,
            covered,
            likely_cause: likely_cause.to_string(),
        }
    }

    pub fn payload_too_large(words: usize, limit: usize, command: &'static str) -> Self {
        Self::PayloadTooLarge {
            words,
            limit,
            command,
        }
    }

    pub fn unexpected_section(command: &'static str, section: &'static str) -> Self {
        Self::UnexpectedSection { command, section }
    }

    /// True for errors caused by too few bytes, which more reading may fix
    pub fn is_short_read(&self) -> bool {
        matches!(self, Self::MessageTooSmall { .. })
    }
}
