//! Serialize data into the bytecode protocol.
//!
//! Classic protocol versions use big-endian fixed-width integers, length
//! prefixed strings and arrays. Flexible versions (KIP-482) add unsigned
//! varints, compact strings/bytes whose length is encoded as `len + 1`,
//! and tagged-field blocks.

use bytes::{BufMut, Bytes};

use crate::error::{Error, Result};

// Helper macro to safely convert an usize expression into a signed
// integer.  If the conversion is not possible the macro issues an
// `EncodingError`, otherwise returns the expression in the requested
// target type.
macro_rules! try_usize_to_int {
    ($value:expr, $ttype:ident) => {{
        let maxv = $ttype::MAX;
        let x: usize = $value;
        if (x as u64) <= (maxv as u64) {
            x as $ttype
        } else {
            return Err(Error::EncodingError);
        }
    }};
}

pub trait ToByte {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()>;
}

impl<'a, T: ToByte + 'a + ?Sized> ToByte for &'a T {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        (*self).encode(buffer)
    }
}

impl ToByte for bool {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i8(*self as i8);
        Ok(())
    }
}

impl ToByte for i8 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i8(*self);
        Ok(())
    }
}

impl ToByte for i16 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i16(*self);
        Ok(())
    }
}

impl ToByte for i32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i32(*self);
        Ok(())
    }
}

impl ToByte for i64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i64(*self);
        Ok(())
    }
}

impl ToByte for str {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        let l = try_usize_to_int!(self.len(), i16);
        buffer.put_i16(l);
        buffer.put(self.as_bytes());
        Ok(())
    }
}

impl ToByte for String {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.as_str().encode(buffer)
    }
}

impl ToByte for Bytes {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        let l = try_usize_to_int!(self.len(), i32);
        buffer.put_i32(l);
        buffer.put(self.as_ref());
        Ok(())
    }
}

impl ToByte for [u8] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        let l = try_usize_to_int!(self.len(), i32);
        buffer.put_i32(l);
        buffer.put(self);
        Ok(())
    }
}

impl<'a> ToByte for Option<&'a str> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match *self {
            Some(s) => s.encode(buffer),
            None => {
                buffer.put_i16(-1);
                Ok(())
            }
        }
    }
}

impl ToByte for Option<Bytes> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match self {
            Some(b) => b.encode(buffer),
            None => {
                buffer.put_i32(-1);
                Ok(())
            }
        }
    }
}

// ~ this allows to render a slice of various types (typically &str
// and String) as strings
pub struct AsStrings<'a, T>(pub &'a [T]);

impl<'a, T: AsRef<str> + 'a> ToByte for AsStrings<'a, T> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        encode_as_array(buffer, self.0, |buffer, x| x.as_ref().encode(buffer))
    }
}

/// ~ Renders the length of `xs` to `buffer` as the start of a
/// protocol array and then for each element of `xs` invokes `f`
/// assuming that function will render the element to the buffer.
pub fn encode_as_array<T, F, W>(buffer: &mut W, xs: &[T], mut f: F) -> Result<()>
where
    F: FnMut(&mut W, &T) -> Result<()>,
    W: BufMut,
{
    let l = try_usize_to_int!(xs.len(), i32);
    buffer.put_i32(l);
    for x in xs {
        f(buffer, x)?;
    }
    Ok(())
}

/// Append an unsigned varint, 7 bits per byte, low bits first.
pub fn put_uvarint<T: BufMut>(buffer: &mut T, mut value: u64) {
    while value >= 0x80 {
        buffer.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buffer.put_u8(value as u8);
}

/// A flexible-version string: uvarint of `len + 1`, then the bytes.
pub struct CompactString<'a>(pub &'a str);

impl<'a> ToByte for CompactString<'a> {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        put_uvarint(buffer, self.0.len() as u64 + 1);
        buffer.put(self.0.as_bytes());
        Ok(())
    }
}

/// Flexible-version bytes: uvarint of `len + 1`, then the bytes.
pub struct CompactBytes<'a>(pub &'a [u8]);

impl<'a> ToByte for CompactBytes<'a> {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        put_uvarint(buffer, self.0.len() as u64 + 1);
        buffer.put(self.0);
        Ok(())
    }
}

/// Append an empty tagged-fields block. The client never sends tags.
pub fn put_empty_tagged_fields<T: BufMut>(buffer: &mut T) {
    buffer.put_u8(0);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codec_i16() {
        let mut buf = vec![];
        5i16.encode(&mut buf).unwrap();
        assert_eq!(buf, [0, 5]);
    }

    #[test]
    fn codec_i32() {
        let mut buf = vec![];
        5i32.encode(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 5]);
    }

    #[test]
    fn codec_i64() {
        let mut buf = vec![];
        5i64.encode(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 0, 5]);
    }

    #[test]
    fn codec_string() {
        let mut buf = vec![];
        "test".encode(&mut buf).unwrap();
        assert_eq!(buf, [0, 4, 116, 101, 115, 116]);
    }

    #[test]
    fn codec_nullable_string() {
        let mut buf = vec![];
        let none: Option<&str> = None;
        none.encode(&mut buf).unwrap();
        assert_eq!(buf, [255, 255]);

        let mut buf = vec![];
        Some("k").encode(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, b'k']);
    }

    #[test]
    fn codec_string_too_long() {
        let s = "a".repeat(i16::MAX as usize + 1);
        let mut buf = Vec::new();
        match s.encode(&mut buf) {
            Err(Error::EncodingError) => {}
            _ => panic!(),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_as_strings() {
        let orig: &[&str] = &["abc", "defg"];
        let mut buf = Vec::new();
        AsStrings(orig).encode(&mut buf).unwrap();
        assert_eq!(
            buf,
            [0, 0, 0, 2, 0, 3, b'a', b'b', b'c', 0, 4, b'd', b'e', b'f', b'g']
        );
    }

    #[test]
    fn codec_uvarint() {
        let mut buf = vec![];
        put_uvarint(&mut buf, 11);
        assert_eq!(buf, [0x0b]);

        let mut buf = vec![];
        put_uvarint(&mut buf, 260);
        assert_eq!(buf, [0x84, 0x02]);
    }

    #[test]
    fn codec_compact_string() {
        let mut buf = vec![];
        CompactString("rust").encode(&mut buf).unwrap();
        assert_eq!(buf, [5, 114, 117, 115, 116]);
    }

    #[test]
    fn codec_compact_bytes() {
        let mut buf = vec![];
        CompactBytes(&[1, 2, 3]).encode(&mut buf).unwrap();
        assert_eq!(buf, [4, 1, 2, 3]);
    }
}
