//! Modified UTF-8, the string encoding of the dex container format.
//!
//! Modified UTF-8 differs from standard UTF-8 in two ways:
//!
//! - code point `U+0000` is written as the two bytes `C0 80`, so encoded strings never
//!   contain a NUL byte and can be NUL terminated;
//! - supplementary code points (`>= U+10000`) are written as their UTF-16 surrogate pair,
//!   each surrogate encoded as a three byte sequence (six bytes total).
//!
//! The container stores strings in this form and compares them by their UTF-16 code
//! units, so the lossless representation is a `Vec<u16>`. [`decode`] additionally maps to
//! a Rust `String`, which fails on unpaired surrogates.

use crate::Result;

/// Encodes a Rust string as modified UTF-8.
#[must_use]
pub fn encode(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().collect();
    encode_utf16(&units)
}

/// Encodes UTF-16 code units (surrogates included, paired or not) as modified UTF-8.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_utf16(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len());
    for &unit in units {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) as u8 & 0x1f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) as u8 & 0x0f));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
        }
    }
    out
}

/// Decodes modified UTF-8 into UTF-16 code units.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for NUL bytes, invalid lead bytes or missing
/// continuation bytes. Four byte (standard UTF-8 supplementary) sequences are rejected.
pub fn decode_utf16(data: &[u8]) -> Result<Vec<u16>> {
    let mut units = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let lead = data[i];
        match lead {
            0x00 => return Err(malformed_error!("NUL byte at offset {} in MUTF-8 data", i)),
            0x01..=0x7f => {
                units.push(u16::from(lead));
                i += 1;
            }
            0xc0..=0xdf => {
                let b1 = continuation(data, i + 1)?;
                units.push((u16::from(lead & 0x1f) << 6) | b1);
                i += 2;
            }
            0xe0..=0xef => {
                let b1 = continuation(data, i + 1)?;
                let b2 = continuation(data, i + 2)?;
                units.push((u16::from(lead & 0x0f) << 12) | (b1 << 6) | b2);
                i += 3;
            }
            _ => {
                return Err(malformed_error!(
                    "invalid MUTF-8 lead byte 0x{:02x} at offset {}",
                    lead,
                    i
                ))
            }
        }
    }
    Ok(units)
}

/// Decodes modified UTF-8 into a Rust string.
///
/// # Errors
///
/// Everything [`decode_utf16`] rejects, plus unpaired surrogates.
pub fn decode(data: &[u8]) -> Result<String> {
    let units = decode_utf16(data)?;
    String::from_utf16(&units).map_err(|_| malformed_error!("unpaired surrogate in MUTF-8 data"))
}

/// Returns the length of the NUL terminated string starting at `data[0]`, in bytes,
/// without the terminator.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if no terminator is present.
pub fn terminated_len(data: &[u8]) -> Result<usize> {
    data.iter()
        .position(|&b| b == 0)
        .ok_or(out_of_bounds_error!())
}

/// Compares two modified UTF-8 strings in UTF-16 code unit order, which is the order the
/// container's string table is sorted by.
#[must_use]
pub fn compare(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    match (decode_utf16(a), decode_utf16(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn continuation(data: &[u8], at: usize) -> Result<u16> {
    match data.get(at) {
        Some(&b) if b & 0xc0 == 0x80 => Ok(u16::from(b & 0x3f)),
        Some(&b) => Err(malformed_error!(
            "expected MUTF-8 continuation byte at offset {}, found 0x{:02x}",
            at,
            b
        )),
        None => Err(out_of_bounds_error!()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_uses_two_bytes() -> crate::Result<()> {
        let encoded = encode("a\0b");
        assert_eq!(encoded, vec![b'a', 0xc0, 0x80, b'b']);
        assert_eq!(decode(&encoded)?, "a\0b");
        Ok(())
    }

    #[test]
    fn supplementary_uses_surrogates() -> crate::Result<()> {
        // U+1F600 -> D83D DE00
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded, vec![0xed, 0xa0, 0xbd, 0xed, 0xb8, 0x80]);
        assert_eq!(decode(&encoded)?, "\u{1F600}");
        Ok(())
    }

    #[test]
    fn unpaired_surrogate_survives_utf16() -> crate::Result<()> {
        let units = vec![0x0041, 0xd800, 0x0042];
        let encoded = encode_utf16(&units);
        assert_eq!(decode_utf16(&encoded)?, units);
        assert!(decode(&encoded).is_err());
        Ok(())
    }

    #[test]
    fn rejects_raw_nul_and_four_byte_sequences() {
        assert!(decode_utf16(&[0x41, 0x00]).is_err());
        assert!(decode_utf16(&[0xf0, 0x9f, 0x98, 0x80]).is_err());
        assert!(matches!(
            decode_utf16(&[0xe0, 0x80]),
            Err(crate::Error::OutOfBounds)
        ));
    }

    #[test]
    fn compares_by_code_units() {
        // U+FFFF sorts after the surrogate pair of U+10000 in UTF-16 order.
        let bmp = encode("\u{FFFF}");
        let supp = encode("\u{10000}");
        assert_eq!(compare(&supp, &bmp), std::cmp::Ordering::Less);
    }
}
