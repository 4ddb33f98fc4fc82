//! # Frame Model
//!
//! A [`Frame`] is the decoded form of one device message. Two families
//! share the wire:
//!
//! - **Legacy**: `A1 <cmd> 0D`, a single command byte and nothing else
//! - **Structured**: `AA 00 <sub-cmd:2> <len:2> <fields...> [crc:2] 0D`
//!
//! The constructors below keep the frame invariants (even payload,
//! `word_count` matching the payload, CRC filled in for parameter frames)
//! so that `unpack(pack(frame)) == frame` for every frame they produce.

use crate::builder::param_crc;
use crate::constants::{length_base, RESULT_BLOCK_LEN, RESULT_PRESENT_DATA_TYPE};
use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// Frame family selected by the first byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Family {
    Legacy,
    Structured,
}

/// Single-byte commands of the legacy family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LegacyCommand {
    GetVersion,
    Stop,
    Start,
    Sw1,
    Sw2,
    Sw3,
    Sw4,
}

impl LegacyCommand {
    pub const ALL: [LegacyCommand; 7] = [
        Self::GetVersion,
        Self::Stop,
        Self::Start,
        Self::Sw1,
        Self::Sw2,
        Self::Sw3,
        Self::Sw4,
    ];

    /// Wire byte of this command
    pub fn code(self) -> u8 {
        match self {
            Self::GetVersion => b'V',
            Self::Stop => b'Q',
            Self::Start => b'S',
            Self::Sw1 => b'A',
            Self::Sw2 => b'B',
            Self::Sw3 => b'C',
            Self::Sw4 => b'D',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.code() == code)
    }
}

/// Every command understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Command {
    Legacy(LegacyCommand),
    /// `MB`: read device parameters
    GetParam,
    /// `AE`: write device parameters
    SetParam,
    /// `GA`: request a block of scan words
    GetBulk,
    /// `GB`: block of scan words, optionally followed by a result block
    SetBulk,
}

impl Command {
    pub fn family(self) -> Family {
        match self {
            Self::Legacy(_) => Family::Legacy,
            _ => Family::Structured,
        }
    }

    /// Two-character sub-command, `None` for legacy commands
    pub fn sub_command(self) -> Option<[u8; 2]> {
        match self {
            Self::Legacy(_) => None,
            Self::GetParam => Some(*b"MB"),
            Self::SetParam => Some(*b"AE"),
            Self::GetBulk => Some(*b"GA"),
            Self::SetBulk => Some(*b"GB"),
        }
    }

    pub fn from_sub_command(code: [u8; 2]) -> Option<Self> {
        match &code {
            b"MB" => Some(Self::GetParam),
            b"AE" => Some(Self::SetParam),
            b"GA" => Some(Self::GetBulk),
            b"GB" => Some(Self::SetBulk),
            _ => None,
        }
    }

    /// Parameter frames carry a CRC16 trailer
    pub fn carries_crc(self) -> bool {
        matches!(self, Self::GetParam | Self::SetParam)
    }

    pub fn carries_payload(self) -> bool {
        matches!(self, Self::SetParam | Self::SetBulk)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Legacy(LegacyCommand::GetVersion) => "GetVersion",
            Self::Legacy(LegacyCommand::Stop) => "Stop",
            Self::Legacy(LegacyCommand::Start) => "Start",
            Self::Legacy(LegacyCommand::Sw1) => "Sw1",
            Self::Legacy(LegacyCommand::Sw2) => "Sw2",
            Self::Legacy(LegacyCommand::Sw3) => "Sw3",
            Self::Legacy(LegacyCommand::Sw4) => "Sw4",
            Self::GetParam => "GetParam",
            Self::SetParam => "SetParam",
            Self::GetBulk => "GetBulk",
            Self::SetBulk => "SetBulk",
        }
    }

    /// Largest payload, in words, that still fits the 16-bit length field
    /// (and, for `SetParam`, the 16-bit byte count field)
    pub fn max_payload_words(self, with_result: bool) -> usize {
        let base = match self {
            Self::SetParam => return usize::from(u16::MAX / 2),
            Self::SetBulk if with_result => length_base::SET_BULK + length_base::RESULT_BLOCK,
            Self::SetBulk => length_base::SET_BULK,
            _ => return 0,
        };
        usize::from(u16::MAX - base)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded device message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub data_type: u16,
    pub start_address: u16,
    pub word_count: u16,
    pub payload: Bytes,
    pub result: Option<[u8; RESULT_BLOCK_LEN]>,
    pub crc16: Option<u16>,
}

impl Frame {
    pub fn legacy(command: LegacyCommand) -> Self {
        Self {
            command: Command::Legacy(command),
            data_type: 0,
            start_address: 0,
            word_count: 0,
            payload: Bytes::new(),
            result: None,
            crc16: None,
        }
    }

    pub fn get_param(data_type: u16, start_address: u16, word_count: u16) -> Self {
        let crc = param_crc(
            length_base::GET_PARAM,
            data_type,
            start_address,
            word_count,
            &[],
        );
        Self {
            command: Command::GetParam,
            data_type,
            start_address,
            word_count,
            payload: Bytes::new(),
            result: None,
            crc16: Some(crc),
        }
    }

    /// Parameter write; the word count is derived from the payload. On the
    /// wire the count field carries the payload length in bytes.
    pub fn set_param(
        data_type: u16,
        start_address: u16,
        payload: impl Into<Bytes>,
    ) -> ProtocolResult<Self> {
        let payload = payload.into();
        let word_count = payload_word_count(Command::SetParam, &payload, false)?;
        let crc = param_crc(
            length_base::SET_PARAM + word_count,
            data_type,
            start_address,
            word_count * 2,
            &payload,
        );
        Ok(Self {
            command: Command::SetParam,
            data_type,
            start_address,
            word_count,
            payload,
            result: None,
            crc16: Some(crc),
        })
    }

    pub fn get_bulk(data_type: u16, start_address: u16, word_count: u16) -> Self {
        Self {
            command: Command::GetBulk,
            data_type,
            start_address,
            word_count,
            payload: Bytes::new(),
            result: None,
            crc16: None,
        }
    }

    /// Bulk reply; `data_type` becomes the result-present sentinel when a
    /// result block is attached, as the decoder reports it
    pub fn set_bulk(
        start_address: u16,
        payload: impl Into<Bytes>,
        result: Option<[u8; RESULT_BLOCK_LEN]>,
    ) -> ProtocolResult<Self> {
        let payload = payload.into();
        let word_count = payload_word_count(Command::SetBulk, &payload, result.is_some())?;
        Ok(Self {
            command: Command::SetBulk,
            data_type: if result.is_some() {
                RESULT_PRESENT_DATA_TYPE
            } else {
                0
            },
            start_address,
            word_count,
            payload,
            result,
            crc16: None,
        })
    }

    pub fn family(&self) -> Family {
        self.command.family()
    }

    /// Payload interpreted as big-endian 16-bit words
    pub fn payload_words(&self) -> impl Iterator<Item = u16> + '_ {
        self.payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }
}

/// Validate a payload for `command` and return its word count
pub(crate) fn payload_word_count(
    command: Command,
    payload: &[u8],
    with_result: bool,
) -> ProtocolResult<u16> {
    if payload.len() % 2 != 0 {
        return Err(ProtocolError::OddPayload { len: payload.len() });
    }
    let words = payload.len() / 2;
    let limit = command.max_payload_words(with_result);
    if words > limit {
        return Err(ProtocolError::payload_too_large(words, limit, command.name()));
    }
    u16::try_from(words).map_err(|_| ProtocolError::payload_too_large(words, limit, command.name()))
}
