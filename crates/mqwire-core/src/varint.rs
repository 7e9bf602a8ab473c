//! Remaining-length encoding for the MQTT fixed header.
//!
//! The remaining length is a variable-length integer: 7 value bits per
//! byte, high bit set when another byte follows. One to four bytes cover
//! 0 through 268_435_455; a fourth byte with the continuation bit set is
//! a protocol error.

use crate::error::{ProtocolError, Result};

/// Largest value representable in four remaining-length bytes.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Decode a remaining-length value from the front of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))` on success and `Ok(None)`
/// when the buffer ends before the final byte, so a streaming caller can
/// wait for more data.
pub fn decode(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut multiplier = 1usize;
    let mut value = 0usize;

    for (i, &byte) in buf.iter().enumerate() {
        if multiplier > 128 * 128 * 128 {
            return Err(ProtocolError::InvalidRemainingLength);
        }

        value += ((byte & 0x7F) as usize) * multiplier;

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }

        multiplier *= 128;
    }

    Ok(None)
}

/// Append the encoding of `value` to `buf`. Returns the number of bytes
/// written (1..=4 for values within `MAX_REMAINING_LENGTH`).
pub fn encode(mut value: usize, buf: &mut Vec<u8>) -> usize {
    debug_assert!(value <= MAX_REMAINING_LENGTH);
    let start = buf.len();
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    buf.len() - start
}

/// Number of bytes `encode` would write for `value`.
pub fn encoded_len(mut value: usize) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}
