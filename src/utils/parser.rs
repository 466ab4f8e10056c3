//! Cursor-based byte reader for encoded side tables.
//!
//! [`Parser`] keeps a position within a byte slice and offers bounds-checked reads of the
//! primitive encodings used by dex data: single bytes, little-endian fixed-width
//! integers, the LEB128 family and NUL terminated MUTF-8 strings.
//!
//! # Example
//!
//! ```rust
//! use dexopt::utils::Parser;
//!
//! let data = [0x05, 0xe5, 0x8e, 0x26, b'h', b'i', 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_u8()?, 5);
//! assert_eq!(parser.read_uleb128()?, 624_485);
//! assert_eq!(parser.read_mutf8()?, "hi");
//! assert!(!parser.has_more_data());
//! # Ok::<(), dexopt::Error>(())
//! ```

use crate::{
    utils::{leb128, mutf8},
    Result,
};

/// A bounds-checked reader over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current offset.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Moves to an absolute offset. Seeking to the end is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }
        self.position = pos;
        Ok(())
    }

    /// Skips `step` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        self.seek(self.position.checked_add(step).ok_or(out_of_bounds_error!())?)
    }

    /// Remaining unread bytes.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    /// Reads the byte at the current offset without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_u8(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.peek_u8()?;
        self.position += 1;
        Ok(value)
    }

    /// Reads a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if fewer than two bytes remain.
    pub fn read_u16_le(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads an unsigned LEB128 value.
    ///
    /// # Errors
    ///
    /// See [`leb128::read_uleb128`].
    pub fn read_uleb128(&mut self) -> Result<u32> {
        let (value, len) = leb128::read_uleb128(self.remaining())?;
        self.position += len;
        Ok(value)
    }

    /// Reads a signed LEB128 value.
    ///
    /// # Errors
    ///
    /// See [`leb128::read_sleb128`].
    pub fn read_sleb128(&mut self) -> Result<i32> {
        let (value, len) = leb128::read_sleb128(self.remaining())?;
        self.position += len;
        Ok(value)
    }

    /// Reads a ULEB128p1 value.
    ///
    /// # Errors
    ///
    /// See [`leb128::read_uleb128p1`].
    pub fn read_uleb128p1(&mut self) -> Result<i32> {
        let (value, len) = leb128::read_uleb128p1(self.remaining())?;
        self.position += len;
        Ok(value)
    }

    /// Reads a NUL terminated MUTF-8 string and consumes the terminator.
    ///
    /// # Errors
    ///
    /// Fails if no terminator follows or the bytes are not valid MUTF-8.
    pub fn read_mutf8(&mut self) -> Result<String> {
        let len = mutf8::terminated_len(self.remaining())?;
        let bytes = self.take(len)?;
        self.position += 1;
        mutf8::decode(bytes)
    }

    /// Runs `f`, restoring the position if it fails.
    ///
    /// # Errors
    ///
    /// Propagates the error of `f`.
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_position = self.position;
        let result = f(self);
        if result.is_err() {
            self.position = saved_position;
        }
        result
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(out_of_bounds_error!())?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}
