//! # Frame Builder - Encoding Frames to Wire Bytes
//!
//! ## Purpose
//!
//! Turns a [`Frame`] into the exact byte sequence the device expects.
//! All multi-byte fields are big-endian; the CRC16 of parameter frames is
//! recomputed on every encode (the `crc16` field of the input is ignored)
//! and appended low byte first, before the terminating CR.
//!
//! ## Wire Layout
//!
//! ```text
//! legacy     A1 <cmd> 0D
//! GetParam   AA 00 'M' 'B' <7>       dt sa wc             crc 0D
//! SetParam   AA 00 'A' 'E' <7+w>     dt sa 2w payload     crc 0D
//! GetBulk    AA 00 'G' 'A' <6>       dt sa wc                 0D
//! SetBulk    AA 00 'G' 'B' <5+w[+10]>   sa w  payload [result] 0D
//! ```

use crate::constants::{
    length_base, FRAME_TERMINATOR, LEGACY_FRAME_LEN, LEGACY_MAGIC, LENGTH_FIELD_OFFSET,
    RESULT_BLOCK_LEN, STRUCTURED_MAGIC,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{payload_word_count, Command, Frame};
use crate::validation::checksum::{append_crc16, calculate_crc16};
use bytes::Bytes;
use tracing::trace;

/// Encode a frame into wire bytes
pub fn pack(frame: &Frame) -> ProtocolResult<Bytes> {
    let bytes = match frame.command {
        Command::Legacy(cmd) => {
            reject_payload(frame)?;
            let mut out = Vec::with_capacity(LEGACY_FRAME_LEN);
            out.extend_from_slice(&[LEGACY_MAGIC, cmd.code(), FRAME_TERMINATOR]);
            out
        }
        Command::GetParam | Command::GetBulk => {
            reject_payload(frame)?;
            let base = if frame.command == Command::GetParam {
                length_base::GET_PARAM
            } else {
                length_base::GET_BULK
            };
            let mut out = structured_header(frame.command, base, 3);
            push_fields(
                &mut out,
                &[frame.data_type, frame.start_address, frame.word_count],
            );
            finish(&mut out, frame.command);
            out
        }
        Command::SetParam => {
            if frame.result.is_some() {
                return Err(ProtocolError::unexpected_section("SetParam", "result block"));
            }
            let words = payload_word_count(Command::SetParam, &frame.payload, false)?;
            let mut out = structured_header(
                Command::SetParam,
                length_base::SET_PARAM + words,
                3 + usize::from(words),
            );
            // count field is the payload length in bytes
            push_fields(&mut out, &[frame.data_type, frame.start_address, words * 2]);
            out.extend_from_slice(&frame.payload);
            finish(&mut out, Command::SetParam);
            out
        }
        Command::SetBulk => {
            let with_result = frame.result.is_some();
            let words = payload_word_count(Command::SetBulk, &frame.payload, with_result)?;
            let mut length = length_base::SET_BULK + words;
            if with_result {
                length += length_base::RESULT_BLOCK;
            }
            let mut out = structured_header(
                Command::SetBulk,
                length,
                2 + usize::from(words) + RESULT_BLOCK_LEN / 2,
            );
            push_fields(&mut out, &[frame.start_address, words]);
            out.extend_from_slice(&frame.payload);
            if let Some(result) = &frame.result {
                out.extend_from_slice(result);
            }
            finish(&mut out, Command::SetBulk);
            out
        }
    };

    trace!(command = %frame.command, len = bytes.len(), frame = %hex::encode(&bytes), "Packed frame");
    Ok(Bytes::from(bytes))
}

/// CRC16 a parameter frame would carry for these field values
pub(crate) fn param_crc(
    length: u16,
    data_type: u16,
    start_address: u16,
    count: u16,
    payload: &[u8],
) -> u16 {
    let mut region = Vec::with_capacity(8 + payload.len());
    push_fields(&mut region, &[length, data_type, start_address, count]);
    region.extend_from_slice(payload);
    calculate_crc16(&region)
}

fn reject_payload(frame: &Frame) -> ProtocolResult<()> {
    if !frame.payload.is_empty() {
        return Err(ProtocolError::unexpected_section(frame.command.name(), "payload"));
    }
    if frame.result.is_some() {
        return Err(ProtocolError::unexpected_section(
            frame.command.name(),
            "result block",
        ));
    }
    Ok(())
}

fn structured_header(command: Command, length: u16, body_words: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_FIELD_OFFSET + 2 + body_words * 2 + 3);
    out.extend_from_slice(&STRUCTURED_MAGIC);
    if let Some(code) = command.sub_command() {
        out.extend_from_slice(&code);
    }
    out.extend_from_slice(&length.to_be_bytes());
    out
}

fn push_fields(out: &mut Vec<u8>, fields: &[u16]) {
    for field in fields {
        out.extend_from_slice(&field.to_be_bytes());
    }
}

fn finish(out: &mut Vec<u8>, command: Command) {
    if command.carries_crc() {
        append_crc16(out, LENGTH_FIELD_OFFSET);
    }
    out.push(FRAME_TERMINATOR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LegacyCommand;

    #[test]
    fn test_get_bulk_scenario_bytes() {
        let bytes = pack(&Frame::get_bulk(0, 0, 2400)).unwrap();
        assert_eq!(
            &bytes[..],
            &[0xAA, 0x00, b'G', b'A', 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x09, 0x60, 0x0D]
        );
    }

    #[test]
    fn test_legacy_frame_bytes() {
        let bytes = pack(&Frame::legacy(LegacyCommand::GetVersion)).unwrap();
        assert_eq!(&bytes[..], &[0xA1, b'V', 0x0D]);
    }

    #[test]
    fn test_get_param_crc_covers_length_and_fields() {
        let bytes = pack(&Frame::get_param(1, 2, 3)).unwrap();
        assert_eq!(bytes.len(), 15);
        let crc = calculate_crc16(&bytes[4..12]);
        assert_eq!(&bytes[12..14], &crc.to_le_bytes());
        assert_eq!(bytes[14], FRAME_TERMINATOR);
    }

    #[test]
    fn test_set_param_count_field_is_payload_bytes() {
        let frame = Frame::set_param(0, 0x10, vec![0xAB, 0xCD, 0x01, 0x02]).unwrap();
        let bytes = pack(&frame).unwrap();
        // length counts words, the count field counts bytes
        assert_eq!(&bytes[4..6], &(7u16 + 2).to_be_bytes());
        assert_eq!(&bytes[10..12], &[0x00, 0x04]);
        assert_eq!(&bytes[12..16], &[0xAB, 0xCD, 0x01, 0x02]);
        assert_eq!(bytes.len(), 12 + 4 + 2 + 1);
        assert_eq!(frame.word_count, 2);
    }

    #[test]
    fn test_set_bulk_length_with_result() {
        let frame = Frame::set_bulk(0, vec![0x12, 0x34, 0x56, 0x78], Some([0u8; 20])).unwrap();
        let bytes = pack(&frame).unwrap();
        assert_eq!(&bytes[4..6], &(5u16 + 2 + 10).to_be_bytes());
        assert_eq!(bytes.len(), 10 + 4 + 20 + 1);
    }

    #[test]
    fn test_pack_ignores_stale_crc_field() {
        let mut frame = Frame::get_param(1, 2, 3);
        let expected = pack(&frame).unwrap();
        frame.crc16 = Some(0xDEAD);
        assert_eq!(pack(&frame).unwrap(), expected);
    }

    #[test]
    fn test_payload_on_request_rejected() {
        let mut frame = Frame::get_bulk(0, 0, 1);
        frame.payload = Bytes::from_static(&[0x00, 0x01]);
        assert!(matches!(
            pack(&frame),
            Err(ProtocolError::UnexpectedSection { section: "payload", .. })
        ));
    }

    #[test]
    fn test_odd_payload_rejected_on_encode() {
        let mut frame = Frame::set_bulk(0, Vec::new(), None).unwrap();
        frame.payload = Bytes::from_static(&[0x01]);
        assert_eq!(pack(&frame), Err(ProtocolError::OddPayload { len: 1 }));
    }
}
