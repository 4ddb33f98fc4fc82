//! # Frame Parser - Decoding Wire Bytes into Frames
//!
//! ## Purpose
//!
//! Decodes one device frame from the start of a buffer. The first byte
//! selects the family, structured frames are dispatched on their
//! two-character sub-command, parameter frames have their CRC16 validated,
//! and bulk replies tolerate short reads by clamping their word count to
//! the bytes actually received.
//!
//! A frame is either returned whole or rejected with a [`ProtocolError`];
//! the parser never panics on malformed input and never returns a
//! partially decoded frame.
//!
//! The declared length field is not checked against the buffer; the
//! per-command field layout is authoritative.

use crate::constants::{
    min_len, FIELDS_OFFSET, LEGACY_MAGIC, LENGTH_FIELD_OFFSET, PARAM_HEADER_LEN,
    RESULT_BLOCK_LEN, RESULT_PRESENT_DATA_TYPE, SET_BULK_HEADER_LEN, SET_BULK_OVERHEAD,
    STRUCTURED_MAGIC,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{Command, Family, Frame, LegacyCommand};
use crate::validation::bounds::{check_buffer_bounds, read_u16_be, safe_slice};
use crate::validation::checksum::{calculate_crc16, verify_crc16};
use bytes::Bytes;
use tracing::debug;

/// Decode the frame at the start of `data`
pub fn unpack(data: &[u8]) -> ProtocolResult<Frame> {
    match detect_family(data)? {
        Family::Legacy => parse_legacy(data),
        Family::Structured => parse_structured(data),
    }
}

/// Classify a buffer by its leading magic without decoding it
pub fn detect_family(data: &[u8]) -> ProtocolResult<Family> {
    let first = *data
        .first()
        .ok_or_else(|| ProtocolError::message_too_small(1, 0, "frame magic"))?;

    if first == LEGACY_MAGIC {
        return Ok(Family::Legacy);
    }
    if first != STRUCTURED_MAGIC[0] {
        return Err(ProtocolError::invalid_magic(first, 0));
    }

    check_buffer_bounds(data, 0, STRUCTURED_MAGIC.len(), "structured magic")?;
    if data[1] != STRUCTURED_MAGIC[1] {
        return Err(ProtocolError::invalid_magic(data[1], 1));
    }
    Ok(Family::Structured)
}

fn parse_legacy(data: &[u8]) -> ProtocolResult<Frame> {
    check_buffer_bounds(data, 0, min_len::LEGACY, "legacy frame")?;
    let command = LegacyCommand::from_code(data[1])
        .ok_or_else(|| ProtocolError::unknown_command(data[1]))?;
    Ok(Frame::legacy(command))
}

fn parse_structured(data: &[u8]) -> ProtocolResult<Frame> {
    let code = safe_slice(data, 2, 2, "structured sub-command")?;
    let code = [code[0], code[1]];
    let command =
        Command::from_sub_command(code).ok_or_else(|| ProtocolError::unknown_sub_command(code))?;

    match command {
        Command::GetParam => parse_get_param(data),
        Command::SetParam => parse_set_param(data),
        Command::GetBulk => parse_get_bulk(data),
        Command::SetBulk => parse_set_bulk(data),
        Command::Legacy(_) => Err(ProtocolError::unknown_sub_command(code)),
    }
}

struct Fields {
    data_type: u16,
    start_address: u16,
    word_count: u16,
}

fn read_fields(data: &[u8], context: &str) -> ProtocolResult<Fields> {
    Ok(Fields {
        data_type: read_u16_be(data, FIELDS_OFFSET, context)?,
        start_address: read_u16_be(data, FIELDS_OFFSET + 2, context)?,
        word_count: read_u16_be(data, FIELDS_OFFSET + 4, context)?,
    })
}

/// Validate the CRC trailer at `crc_offset` over `[LENGTH_FIELD_OFFSET, crc_offset)`
fn check_crc(data: &[u8], crc_offset: usize) -> ProtocolResult<u16> {
    let trailer = safe_slice(data, crc_offset, 2, "crc16 trailer")?;
    let expected = u16::from_le_bytes([trailer[0], trailer[1]]);
    let region = &data[LENGTH_FIELD_OFFSET..crc_offset];
    if !verify_crc16(region, expected) {
        return Err(ProtocolError::checksum_mismatch(
            expected,
            calculate_crc16(region),
            region.len(),
        ));
    }
    Ok(expected)
}

fn parse_get_param(data: &[u8]) -> ProtocolResult<Frame> {
    check_buffer_bounds(data, 0, min_len::GET_PARAM, "GetParam frame")?;
    let fields = read_fields(data, "GetParam fields")?;
    let crc = check_crc(data, PARAM_HEADER_LEN)?;

    Ok(Frame {
        command: Command::GetParam,
        data_type: fields.data_type,
        start_address: fields.start_address,
        word_count: fields.word_count,
        payload: Bytes::new(),
        result: None,
        crc16: Some(crc),
    })
}

fn parse_set_param(data: &[u8]) -> ProtocolResult<Frame> {
    check_buffer_bounds(data, 0, min_len::SET_PARAM, "SetParam frame")?;
    let fields = read_fields(data, "SetParam fields")?;
    // the count field carries the payload length in bytes
    let payload_len = usize::from(fields.word_count);
    if payload_len % 2 != 0 {
        return Err(ProtocolError::OddPayload { len: payload_len });
    }
    check_buffer_bounds(
        data,
        0,
        min_len::SET_PARAM + payload_len,
        "SetParam payload",
    )?;

    let payload = Bytes::copy_from_slice(&data[PARAM_HEADER_LEN..PARAM_HEADER_LEN + payload_len]);
    let crc = check_crc(data, PARAM_HEADER_LEN + payload_len)?;

    Ok(Frame {
        command: Command::SetParam,
        data_type: fields.data_type,
        start_address: fields.start_address,
        word_count: fields.word_count / 2,
        payload,
        result: None,
        crc16: Some(crc),
    })
}

fn parse_get_bulk(data: &[u8]) -> ProtocolResult<Frame> {
    check_buffer_bounds(data, 0, min_len::GET_BULK, "GetBulk frame")?;
    let fields = read_fields(data, "GetBulk fields")?;

    Ok(Frame {
        command: Command::GetBulk,
        data_type: fields.data_type,
        start_address: fields.start_address,
        word_count: fields.word_count,
        payload: Bytes::new(),
        result: None,
        crc16: None,
    })
}

fn parse_set_bulk(data: &[u8]) -> ProtocolResult<Frame> {
    check_buffer_bounds(data, 0, min_len::SET_BULK, "SetBulk frame")?;
    let start_address = read_u16_be(data, FIELDS_OFFSET, "SetBulk fields")?;
    let declared = read_u16_be(data, FIELDS_OFFSET + 2, "SetBulk fields")?;

    let available = data.len().saturating_sub(SET_BULK_OVERHEAD);
    let mut word_count = declared;
    let mut data_type = 0;
    let mut result = None;

    if usize::from(declared) * 2 > available {
        // available / 2 < declared, so the narrowing cannot truncate
        word_count = (available / 2) as u16;
        debug!(
            declared,
            clamped = word_count,
            received = data.len(),
            "SetBulk short read, word count clamped"
        );
    }

    let payload_end = SET_BULK_HEADER_LEN + usize::from(word_count) * 2;
    let payload = Bytes::copy_from_slice(&data[SET_BULK_HEADER_LEN..payload_end]);

    if word_count == declared && data.len() - payload_end >= RESULT_BLOCK_LEN {
        let mut block = [0u8; RESULT_BLOCK_LEN];
        block.copy_from_slice(&data[payload_end..payload_end + RESULT_BLOCK_LEN]);
        result = Some(block);
        data_type = RESULT_PRESENT_DATA_TYPE;
    }

    Ok(Frame {
        command: Command::SetBulk,
        data_type,
        start_address,
        word_count,
        payload,
        result,
        crc16: None,
    })
}
