//! Variable-length integer codecs used by the dex container format.
//!
//! - **ULEB128**: unsigned, little-endian groups of 7 bits, continuation flag in bit 7 of
//!   every byte but the last. Values are limited to 32 bits, so at most five bytes are read
//!   and the fifth byte may only contribute its low four bits.
//! - **SLEB128**: same layout; the value is sign-extended from bit 6 of the final byte.
//! - **ULEB128p1**: the stored ULEB128 value is the real value plus one, so the optional
//!   sentinel `-1` is stored as `0`.
//!
//! The `read_*` functions decode from the start of a slice and return the value together
//! with the number of bytes consumed. [`crate::utils::Parser`] wraps them for cursor-style
//! reading.

use crate::Result;

/// Maximum encoded length of a 32-bit value.
pub const MAX_LEB128_LEN: usize = 5;

/// Decodes an unsigned LEB128 value.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the input ends inside the value and
/// [`crate::Error::Malformed`] if the value does not fit in 32 bits.
pub fn read_uleb128(data: &[u8]) -> Result<(u32, usize)> {
    let mut result: u32 = 0;
    for (i, &byte) in data.iter().take(MAX_LEB128_LEN).enumerate() {
        let chunk = u32::from(byte & 0x7f);
        if i == MAX_LEB128_LEN - 1 && (byte & 0xf0) != 0 {
            return Err(malformed_error!(
                "ULEB128 value exceeds 32 bits (last byte 0x{:02x})",
                byte
            ));
        }
        result |= chunk << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    if data.len() < MAX_LEB128_LEN {
        Err(out_of_bounds_error!())
    } else {
        Err(malformed_error!("ULEB128 value longer than 5 bytes"))
    }
}

/// Decodes a signed LEB128 value.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the input ends inside the value and
/// [`crate::Error::Malformed`] if more than five bytes carry the continuation bit.
pub fn read_sleb128(data: &[u8]) -> Result<(i32, usize)> {
    let mut result: i64 = 0;
    for (i, &byte) in data.iter().take(MAX_LEB128_LEN).enumerate() {
        result |= i64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            let bits = 7 * (i + 1);
            if bits < 64 && byte & 0x40 != 0 {
                result |= -1i64 << bits;
            }
            #[allow(clippy::cast_possible_truncation)]
            let value = result as i32;
            return Ok((value, i + 1));
        }
    }

    if data.len() < MAX_LEB128_LEN {
        Err(out_of_bounds_error!())
    } else {
        Err(malformed_error!("SLEB128 value longer than 5 bytes"))
    }
}

/// Decodes a ULEB128p1 value; a stored `0` yields `-1`.
///
/// # Errors
///
/// Same as [`read_uleb128`].
pub fn read_uleb128p1(data: &[u8]) -> Result<(i32, usize)> {
    let (raw, len) = read_uleb128(data)?;
    #[allow(clippy::cast_possible_wrap)]
    let value = (raw as i32).wrapping_sub(1);
    Ok((value, len))
}

/// Appends the ULEB128 encoding of `value`.
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Appends the SLEB128 encoding of `value`.
pub fn write_sleb128(out: &mut Vec<u8>, mut value: i32) {
    loop {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Appends the ULEB128p1 encoding of `value` (`-1` is stored as `0`).
pub fn write_uleb128p1(out: &mut Vec<u8>, value: i32) {
    #[allow(clippy::cast_sign_loss)]
    let raw = value.wrapping_add(1) as u32;
    write_uleb128(out, raw);
}

/// Number of bytes [`write_uleb128`] produces for `value`.
#[must_use]
pub fn uleb128_size(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn uleb128_known_vectors() -> crate::Result<()> {
        assert_eq!(read_uleb128(&[0x00])?, (0, 1));
        assert_eq!(read_uleb128(&[0x7f])?, (127, 1));
        assert_eq!(read_uleb128(&[0x80, 0x7f])?, (16256, 2));
        assert_eq!(read_uleb128(&[0xe5, 0x8e, 0x26])?, (624_485, 3));
        assert_eq!(
            read_uleb128(&[0xff, 0xff, 0xff, 0xff, 0x0f])?,
            (u32::MAX, 5)
        );
        Ok(())
    }

    #[test]
    fn uleb128_rejects_overlong() {
        assert!(matches!(
            read_uleb128(&[0xff, 0xff, 0xff, 0xff, 0x1f]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            read_uleb128(&[0x80, 0x80]),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn sleb128_sign_extension() -> crate::Result<()> {
        assert_eq!(read_sleb128(&[0x00])?, (0, 1));
        assert_eq!(read_sleb128(&[0x01])?, (1, 1));
        assert_eq!(read_sleb128(&[0x7f])?, (-1, 1));
        assert_eq!(read_sleb128(&[0x80, 0x7f])?, (-128, 2));
        assert_eq!(read_sleb128(&[0x3c])?, (60, 1));
        assert_eq!(read_sleb128(&[0x80, 0x80, 0x80, 0x80, 0x78])?, (i32::MIN, 5));
        Ok(())
    }

    #[test]
    fn uleb128p1_sentinel() -> crate::Result<()> {
        assert_eq!(read_uleb128p1(&[0x00])?, (-1, 1));
        assert_eq!(read_uleb128p1(&[0x01])?, (0, 1));
        let mut out = Vec::new();
        write_uleb128p1(&mut out, -1);
        assert_eq!(out, vec![0x00]);
        Ok(())
    }

    #[test]
    fn writers_match_readers() -> crate::Result<()> {
        for value in [0u32, 1, 127, 128, 300, 16_383, 16_384, 1 << 28, u32::MAX] {
            let mut out = Vec::new();
            write_uleb128(&mut out, value);
            assert_eq!(out.len(), uleb128_size(value));
            assert_eq!(read_uleb128(&out)?, (value, out.len()));
        }
        for value in [0i32, -1, 63, 64, -64, -65, i32::MAX, i32::MIN] {
            let mut out = Vec::new();
            write_sleb128(&mut out, value);
            assert_eq!(read_sleb128(&out)?, (value, out.len()));
        }
        Ok(())
    }
}
