//! Bounds Checking for Safe Frame Reads
//!
//! Prevents buffer overruns when decoding untrusted device input

use crate::error::{ProtocolError, ProtocolResult};

/// Check if a buffer has enough bytes for a read operation
pub fn check_buffer_bounds(
    buffer: &[u8],
    offset: usize,
    size: usize,
    context: &str,
) -> ProtocolResult<()> {
    let need = offset.saturating_add(size);
    if need > buffer.len() {
        return Err(ProtocolError::message_too_small(need, buffer.len(), context));
    }
    Ok(())
}

/// Safely extract a slice from a buffer with bounds checking
pub fn safe_slice<'a>(
    buffer: &'a [u8],
    offset: usize,
    size: usize,
    context: &str,
) -> ProtocolResult<&'a [u8]> {
    check_buffer_bounds(buffer, offset, size, context)?;
    Ok(&buffer[offset..offset + size])
}

/// Read a big-endian u16 field
pub fn read_u16_be(buffer: &[u8], offset: usize, context: &str) -> ProtocolResult<u16> {
    let bytes = safe_slice(buffer, offset, 2, context)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}
