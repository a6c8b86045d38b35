//! Protobuf wire-format primitives.
//!
//! Just enough of the encoding to read and write the Meshtastic messages
//! the gateway handles: varints, fixed32/fixed64, length-delimited fields.
//! Groups (wire types 3/4) are rejected.
//!
//! ```text
//! key    = (field_number << 3) | wire_type      (varint)
//! varint = 7 bits per byte, LSB first, MSB = continuation
//! ```

use crate::error::DecodeError;
use heapless::{String, Vec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WireType {
    Varint,
    Fixed64,
    Len,
    Fixed32,
}

impl WireType {
    fn from_bits(bits: u8) -> Result<Self, DecodeError> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::Len),
            5 => Ok(WireType::Fixed32),
            other => Err(DecodeError::InvalidWireType(other)),
        }
    }

    fn bits(self) -> u8 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::Len => 2,
            WireType::Fixed32 => 5,
        }
    }
}

/// Cursor over an encoded message.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        for i in 0..10 {
            let byte = *self.buf.get(self.pos).ok_or(DecodeError::Truncated)?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::InvalidVarint)
    }

    /// Next field key as `(field_number, wire_type)`.
    pub fn read_key(&mut self) -> Result<(u32, WireType), DecodeError> {
        let key = self.read_varint()?;
        let wire_type = WireType::from_bits((key & 0x07) as u8)?;
        Ok(((key >> 3) as u32, wire_type))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(self.read_varint()? as u32)
    }

    /// `int32` is sign-extended to 64 bits on the wire.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_varint()? as i64 as i32)
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_fixed32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_sfixed32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_fixed32()? as i32)
    }

    pub fn read_float(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_fixed32()?))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varint()? as usize;
        self.take(len)
    }

    /// Length-delimited field copied into a bounded buffer.
    pub fn read_bytes_into<const N: usize>(&mut self) -> Result<Vec<u8, N>, DecodeError> {
        let bytes = self.read_bytes()?;
        Vec::from_slice(bytes).map_err(|_| DecodeError::FieldTooLong)
    }

    /// UTF-8 string field, truncated at a char boundary to fit `N` bytes.
    pub fn read_string<const N: usize>(&mut self) -> Result<String<N>, DecodeError> {
        let bytes = self.read_bytes()?;
        let s = core::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
        let mut out = String::new();
        for c in s.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        Ok(out)
    }

    pub fn skip(&mut self, wire_type: WireType) -> Result<(), DecodeError> {
        match wire_type {
            WireType::Varint => self.read_varint().map(|_| ()),
            WireType::Fixed64 => self.take(8).map(|_| ()),
            WireType::Len => self.read_bytes().map(|_| ()),
            WireType::Fixed32 => self.take(4).map(|_| ()),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }
}

/// Encoder into a caller-provided buffer.
///
/// Scalar writers skip zero values, matching proto3 default omission.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

/// The output buffer is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Overflow;

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn put_varint(&mut self, mut value: u64) -> Result<(), Overflow> {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                return self.put(&[byte]);
            }
            self.put(&[byte | 0x80])?;
        }
    }

    pub fn put_key(&mut self, field: u32, wire_type: WireType) -> Result<(), Overflow> {
        self.put_varint((u64::from(field) << 3) | u64::from(wire_type.bits()))
    }

    pub fn uint32(&mut self, field: u32, value: u32) -> Result<(), Overflow> {
        if value == 0 {
            return Ok(());
        }
        self.put_key(field, WireType::Varint)?;
        self.put_varint(u64::from(value))
    }

    pub fn int32(&mut self, field: u32, value: i32) -> Result<(), Overflow> {
        if value == 0 {
            return Ok(());
        }
        self.put_key(field, WireType::Varint)?;
        self.put_varint(value as i64 as u64)
    }

    pub fn bool(&mut self, field: u32, value: bool) -> Result<(), Overflow> {
        self.uint32(field, u32::from(value))
    }

    pub fn fixed32(&mut self, field: u32, value: u32) -> Result<(), Overflow> {
        if value == 0 {
            return Ok(());
        }
        self.put_key(field, WireType::Fixed32)?;
        self.put(&value.to_le_bytes())
    }

    pub fn sfixed32(&mut self, field: u32, value: i32) -> Result<(), Overflow> {
        self.fixed32(field, value as u32)
    }

    /// Always written when present, even if zero (`optional float`).
    pub fn float(&mut self, field: u32, value: f32) -> Result<(), Overflow> {
        self.put_key(field, WireType::Fixed32)?;
        self.put(&value.to_bits().to_le_bytes())
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) -> Result<(), Overflow> {
        if value.is_empty() {
            return Ok(());
        }
        self.put_key(field, WireType::Len)?;
        self.put_varint(value.len() as u64)?;
        self.put(value)
    }

    pub fn string(&mut self, field: u32, value: &str) -> Result<(), Overflow> {
        self.bytes(field, value.as_bytes())
    }

    /// Nested message.  The body is staged in a scratch buffer of `N` bytes
    /// so its length prefix can be written first.
    pub fn message<const N: usize>(
        &mut self,
        field: u32,
        body: impl FnOnce(&mut Writer<'_>) -> Result<(), Overflow>,
    ) -> Result<(), Overflow> {
        let mut scratch = [0u8; N];
        let mut inner = Writer::new(&mut scratch);
        body(&mut inner)?;
        let len = inner.len();
        self.put_key(field, WireType::Len)?;
        self.put_varint(len as u64)?;
        self.put(&scratch[..len])
    }

    fn put(&mut self, data: &[u8]) -> Result<(), Overflow> {
        let end = self.pos + data.len();
        let dst = self.buf.get_mut(self.pos..end).ok_or(Overflow)?;
        dst.copy_from_slice(data);
        self.pos = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_multi_byte() {
        // 300 = 0b1_0010_1100 -> AC 02
        let mut r = Reader::new(&[0xAC, 0x02]);
        assert_eq!(r.read_varint(), Ok(300));
        assert!(r.is_empty());
    }

    #[test]
    fn varint_truncated_and_overlong() {
        assert_eq!(Reader::new(&[0x80]).read_varint(), Err(DecodeError::Truncated));
        let overlong = [0xFF; 11];
        assert_eq!(
            Reader::new(&overlong).read_varint(),
            Err(DecodeError::InvalidVarint)
        );
    }

    #[test]
    fn key_splits_field_and_wire_type() {
        // field 7, varint -> 0x38
        let mut r = Reader::new(&[0x38]);
        assert_eq!(r.read_key(), Ok((7, WireType::Varint)));
    }

    #[test]
    fn group_wire_types_are_rejected() {
        // field 1, wire type 3 (start group)
        let mut r = Reader::new(&[0x0B]);
        assert_eq!(r.read_key(), Err(DecodeError::InvalidWireType(3)));
    }

    #[test]
    fn negative_int32_uses_ten_bytes() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.int32(3, -5).unwrap();
        // key + 10-byte varint
        assert_eq!(w.len(), 11);
        let mut r = Reader::new(w.written());
        assert_eq!(r.read_key(), Ok((3, WireType::Varint)));
        assert_eq!(r.read_i32(), Ok(-5));
    }

    #[test]
    fn length_past_end_is_truncated() {
        let mut r = Reader::new(&[0x05, b'a', b'b']);
        assert_eq!(r.read_bytes(), Err(DecodeError::Truncated));
    }

    #[test]
    fn string_is_truncated_on_char_boundary() {
        // "aé" = 61 C3 A9; capacity 2 keeps only "a"
        let mut r = Reader::new(&[0x03, 0x61, 0xC3, 0xA9]);
        let s: String<2> = r.read_string().unwrap();
        assert_eq!(s.as_str(), "a");
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut r = Reader::new(&[0x01, 0xFF]);
        assert_eq!(r.read_string::<8>(), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn writer_skips_defaults_and_reports_overflow() {
        let mut buf = [0u8; 2];
        let mut w = Writer::new(&mut buf);
        w.uint32(1, 0).unwrap();
        w.bytes(2, &[]).unwrap();
        assert!(w.is_empty());
        assert_eq!(w.fixed32(1, 1), Err(Overflow));
    }

    #[test]
    fn skip_each_wire_type() {
        let data = [
            0x08, 0x96, 0x01, // field 1 varint 150
            0x11, 0, 0, 0, 0, 0, 0, 0, 0, // field 2 fixed64
            0x1A, 0x01, 0x00, // field 3 len 1
            0x25, 0, 0, 0, 0, // field 4 fixed32
        ];
        let mut r = Reader::new(&data);
        while !r.is_empty() {
            let (_, wt) = r.read_key().unwrap();
            r.skip(wt).unwrap();
        }
    }
}
