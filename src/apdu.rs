//! Application layer: `tag(3) | length | payload` objects.

use bytes::{BufMut, BytesMut};

use crate::codec::{Cursor, decode_length, put_length};
use crate::constants::AOT_NONE;
use crate::error::ParseError;

/// First three bytes as a big-endian tag, `AOT_NONE` if too short.
pub fn get_tag(apdu: &[u8]) -> u32 {
    match apdu {
        [a, b, c, ..] => u32::from_be_bytes([0, *a, *b, *c]),
        _ => AOT_NONE,
    }
}

/// Length field at offset 3, returning the declared value and the payload
/// that follows it (bounded by the buffer).
pub fn get_length(apdu: &[u8]) -> Result<(u32, &[u8]), ParseError> {
    let tail = apdu.get(3..).ok_or(ParseError::Truncated { needed: 3, available: apdu.len() })?;
    let (len, used) = decode_length(tail)?;
    Ok((len, &tail[used..]))
}

/// Payload of an APDU, checked against its declared length.
pub fn payload(apdu: &[u8]) -> Result<&[u8], ParseError> {
    let mut c = Cursor::new(apdu);
    c.be_u24()?;
    c.length_prefixed()
}

pub fn encode(tag: u32, data: &[u8]) -> BytesMut {
    let mut apdu = BytesMut::with_capacity(data.len() + 8);
    apdu.put_slice(&tag.to_be_bytes()[1..]);
    put_length(&mut apdu, data.len() as u32);
    apdu.put_slice(data);
    apdu
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use hex_literal::hex;

    #[test]
    fn tag_needs_three_bytes() {
        assert_eq!(get_tag(&hex!("9F 80 10 00")), AOT_PROFILE_ENQ);
        assert_eq!(get_tag(&hex!("9F 80")), AOT_NONE);
    }

    #[test]
    fn encode_short_and_long_lengths() {
        assert_eq!(&encode(AOT_PROFILE_CHANGE, &[])[..], &hex!("9F 80 12 00"));
        let big = encode(AOT_CA_PMT, &[0u8; 200]);
        assert_eq!(&big[..5], &hex!("9F 80 32 81 C8"));
        assert_eq!(big.len(), 205);
    }

    #[test]
    fn payload_is_bounded_by_declared_length() {
        let apdu = hex!("9F 84 40 01 05 FF");
        assert_eq!(get_length(&apdu).unwrap(), (1, &hex!("05 FF")[..]));
        assert_eq!(payload(&apdu).unwrap(), &[0x05]);
        assert!(payload(&hex!("9F 84 40 04 05")).is_err());
    }
}
