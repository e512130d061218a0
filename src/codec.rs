//! Length field codec and a bounds-checked cursor shared by every layer.

use bytes::BufMut;

use crate::constants::SIZE_INDICATOR;
use crate::error::ParseError;

/// Decodes a length field, returning `(value, bytes_consumed)`.
pub fn decode_length(buf: &[u8]) -> Result<(u32, usize), ParseError> {
    let [first, rest @ ..] = buf else {
        return Err(ParseError::Truncated { needed: 1, available: 0 });
    };
    if first & SIZE_INDICATOR == 0 {
        return Ok((*first as u32, 1));
    }

    let n = (first & !SIZE_INDICATOR) as usize;
    if n > 4 {
        return Err(ParseError::LengthTooWide(n));
    }
    let Some(bytes) = rest.get(..n) else {
        return Err(ParseError::Truncated { needed: n, available: rest.len() });
    };
    let value = bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
    Ok((value, 1 + n))
}

/// Appends the shortest encoding of `value`.
pub fn put_length<B: BufMut>(buf: &mut B, value: u32) {
    if value < 0x80 {
        buf.put_u8(value as u8);
        return;
    }
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    buf.put_u8(SIZE_INDICATOR | (4 - skip) as u8);
    buf.put_slice(&bytes[skip..]);
}

pub fn encode_length(value: u32) -> Vec<u8> {
    let mut v = Vec::with_capacity(5);
    put_length(&mut v, value);
    v
}

/// Forward-only reader over a borrowed slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn rest(&self) -> &'a [u8] {
        self.data
    }

    pub fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    pub fn be_u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn be_u24(&mut self) -> Result<u32, ParseError> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn be_u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let Some((head, tail)) = self.data.split_at_checked(n) else {
            return Err(ParseError::Truncated { needed: n, available: self.data.len() });
        };
        self.data = tail;
        Ok(head)
    }

    /// Reads a length field, then that many bytes.
    pub fn length_prefixed(&mut self) -> Result<&'a [u8], ParseError> {
        let (len, used) = decode_length(self.data)?;
        self.data = &self.data[used..];
        self.take(len as usize)
    }
}
