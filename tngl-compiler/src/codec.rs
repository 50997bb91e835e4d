//! Little-endian byte codec shared by the compiler and the controller link.
//!
//! Two cursors over a byte buffer:
//! - [`TnglWriter`] appends into a fixed-capacity buffer.
//! - [`TnglReader`] walks a borrowed slice.
//!
//! Integers are little-endian and width-parameterised (1, 2, 4, 6 or 8
//! bytes).  Any read past the end of the slice or write past the capacity
//! fails the call with [`CodecError::OutOfBounds`]; the cursor does not move
//! in that case.  No frame semantics live here.

use crate::error::CodecError;

/// Widths accepted by the value readers and writers.
pub const VALUE_WIDTHS: [usize; 5] = [1, 2, 4, 6, 8];

fn check_width(width: usize) -> Result<(), CodecError> {
    if VALUE_WIDTHS.contains(&width) {
        Ok(())
    } else {
        Err(CodecError::InvalidWidth(width))
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only writer over a buffer that never grows past `capacity`.
#[derive(Debug, Clone)]
pub struct TnglWriter {
    buffer: Vec<u8>,
    capacity: usize,
}

impl TnglWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.buffer.len()
    }

    /// Remaining capacity in bytes.
    pub fn available(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn reserve(&self, requested: usize) -> Result<(), CodecError> {
        if requested > self.available() {
            return Err(CodecError::OutOfBounds {
                position: self.buffer.len(),
                requested,
                length: self.capacity,
            });
        }
        Ok(())
    }

    pub fn write_flag(&mut self, flag: u8) -> Result<(), CodecError> {
        self.reserve(1)?;
        self.buffer.push(flag);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.reserve(bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Write an unsigned value using exactly `width` bytes.
    pub fn write_value(&mut self, value: u64, width: usize) -> Result<(), CodecError> {
        check_width(width)?;
        if width < 8 && value >> (width * 8) != 0 {
            return Err(CodecError::ValueOverflow {
                value: value as i128,
                width,
            });
        }
        self.reserve(width)?;
        self.buffer.extend_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    /// Write a signed value as `width`-byte two's complement.
    pub fn write_signed(&mut self, value: i64, width: usize) -> Result<(), CodecError> {
        check_width(width)?;
        if width < 8 {
            let bits = width * 8;
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if value < min || value > max {
                return Err(CodecError::ValueOverflow {
                    value: value as i128,
                    width,
                });
            }
        }
        self.reserve(width)?;
        self.buffer.extend_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    /// Write `text` into a field of exactly `length` bytes: longer input is
    /// truncated, shorter input is zero-padded.
    pub fn write_string(&mut self, text: &str, length: usize) -> Result<(), CodecError> {
        self.reserve(length)?;
        let bytes = text.as_bytes();
        let n = bytes.len().min(length);
        self.buffer.extend_from_slice(&bytes[..n]);
        self.buffer.resize(self.buffer.len() + (length - n), 0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Forward cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct TnglReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> TnglReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the cursor and the end of the slice.
    pub fn available(&self) -> usize {
        self.data.len() - self.position
    }

    fn span(&self, requested: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .position
            .checked_add(requested)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::OutOfBounds {
                position: self.position,
                requested,
                length: self.data.len(),
            })?;
        Ok(&self.data[self.position..end])
    }

    pub fn peek_flag(&self) -> Result<u8, CodecError> {
        Ok(self.span(1)?[0])
    }

    pub fn read_flag(&mut self) -> Result<u8, CodecError> {
        let flag = self.peek_flag()?;
        self.position += 1;
        Ok(flag)
    }

    /// Read an unsigned little-endian value of `width` bytes without
    /// advancing the cursor.
    pub fn peek_value(&self, width: usize) -> Result<u64, CodecError> {
        check_width(width)?;
        let bytes = self.span(width)?;
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_value(&mut self, width: usize) -> Result<u64, CodecError> {
        let value = self.peek_value(width)?;
        self.position += width;
        Ok(value)
    }

    /// Read a `width`-byte two's complement value, sign-extended to `i64`.
    pub fn read_signed(&mut self, width: usize) -> Result<i64, CodecError> {
        let raw = self.read_value(width)?;
        let shift = 64 - width as u32 * 8;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8], CodecError> {
        let bytes = self.span(length)?;
        self.position += length;
        Ok(bytes)
    }

    /// Read a `length`-byte text field. Characters stop at the first NUL but
    /// the cursor always advances by the full `length`.
    pub fn read_string(&mut self, length: usize) -> Result<String, CodecError> {
        let bytes = self.read_bytes(length)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn forward(&mut self, count: usize) -> Result<(), CodecError> {
        self.span(count)?;
        self.position += count;
        Ok(())
    }

    pub fn back(&mut self, count: usize) -> Result<(), CodecError> {
        if count > self.position {
            return Err(CodecError::OutOfBounds {
                position: self.position,
                requested: count,
                length: self.data.len(),
            });
        }
        self.position -= count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_values_round_trip_at_every_width() {
        for width in VALUE_WIDTHS {
            let max = if width == 8 { u64::MAX } else { (1u64 << (width * 8)) - 1 };
            for value in [0, 1, max / 2, max] {
                let mut writer = TnglWriter::with_capacity(8);
                writer.write_value(value, width).unwrap();
                assert_eq!(writer.written(), width);
                let bytes = writer.into_bytes();
                let mut reader = TnglReader::new(&bytes);
                assert_eq!(reader.read_value(width).unwrap(), value);
                assert_eq!(reader.available(), 0);
            }
        }
    }

    #[test]
    fn signed_values_round_trip_at_every_width() {
        for width in VALUE_WIDTHS {
            let bits = width * 8;
            let (min, max) = if width == 8 {
                (i64::MIN, i64::MAX)
            } else {
                (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
            };
            for value in [min, -1, 0, 1, max] {
                let mut writer = TnglWriter::with_capacity(8);
                writer.write_signed(value, width).unwrap();
                let bytes = writer.into_bytes();
                assert_eq!(TnglReader::new(&bytes).read_signed(width).unwrap(), value);
            }
        }
    }

    #[test]
    fn values_are_little_endian() {
        let mut writer = TnglWriter::with_capacity(8);
        writer.write_value(0x0102_0304, 4).unwrap();
        assert_eq!(writer.bytes(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn six_byte_values_cover_the_clock_range() {
        let mut writer = TnglWriter::with_capacity(6);
        writer.write_value(0xFFFF_FFFF_FFFF, 6).unwrap();
        assert_eq!(writer.written(), 6);
        assert!(writer.write_value(1, 1).is_err());
    }

    #[test]
    fn invalid_width_is_rejected() {
        let mut writer = TnglWriter::with_capacity(8);
        assert_eq!(writer.write_value(1, 3), Err(CodecError::InvalidWidth(3)));
        let mut reader = TnglReader::new(&[0u8; 8]);
        assert_eq!(reader.read_value(5), Err(CodecError::InvalidWidth(5)));
    }

    #[test]
    fn overflowing_values_are_rejected() {
        let mut writer = TnglWriter::with_capacity(8);
        assert!(matches!(
            writer.write_value(256, 1),
            Err(CodecError::ValueOverflow { .. })
        ));
        assert!(matches!(
            writer.write_signed(128, 1),
            Err(CodecError::ValueOverflow { .. })
        ));
        assert_eq!(writer.written(), 0);
    }

    #[test]
    fn writing_past_capacity_fails_without_partial_write() {
        let mut writer = TnglWriter::with_capacity(3);
        writer.write_flag(1).unwrap();
        let err = writer.write_value(7, 4).unwrap_err();
        assert_eq!(
            err,
            CodecError::OutOfBounds {
                position: 1,
                requested: 4,
                length: 3
            }
        );
        assert_eq!(writer.written(), 1);
    }

    #[test]
    fn reading_past_end_fails_and_keeps_cursor() {
        let data = [1u8, 2, 3];
        let mut reader = TnglReader::new(&data);
        reader.read_flag().unwrap();
        assert!(reader.read_value(4).is_err());
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_value(2).unwrap(), 0x0302);
        assert!(reader.read_flag().is_err());
    }

    #[test]
    fn string_read_stops_at_nul_but_advances_full_length() {
        let data = *b"ab\0cd\x07";
        let mut reader = TnglReader::new(&data);
        assert_eq!(reader.read_string(5).unwrap(), "ab");
        assert_eq!(reader.position(), 5);
        assert_eq!(reader.read_flag().unwrap(), 7);
    }

    #[test]
    fn string_write_pads_and_truncates() {
        let mut writer = TnglWriter::with_capacity(16);
        writer.write_string("go", 5).unwrap();
        writer.write_string("toolong", 3).unwrap();
        assert_eq!(writer.bytes(), b"go\0\0\0too");
    }

    #[test]
    fn string_write_stays_inside_its_field() {
        let mut writer = TnglWriter::with_capacity(4);
        assert!(writer.write_string("abc", 5).is_err());
        assert_eq!(writer.written(), 0);
    }

    #[test]
    fn back_and_forward_move_the_cursor() {
        let data = [9u8, 8, 7];
        let mut reader = TnglReader::new(&data);
        reader.forward(2).unwrap();
        assert_eq!(reader.peek_flag().unwrap(), 7);
        reader.back(2).unwrap();
        assert_eq!(reader.read_flag().unwrap(), 9);
        assert!(reader.back(5).is_err());
        assert!(reader.forward(3).is_err());
    }
}
