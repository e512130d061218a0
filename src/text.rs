//! DVB SI text strings (EN 300 468 annex A) as used by CAM menus.

use tracing::debug;

/// Decodes a DVB text field. The first byte may select the character table;
/// without a selector the default table is approximated by Latin-1.
pub fn decode_dvb_text(raw: &[u8]) -> String {
    match raw {
        [] => String::new(),
        [0x01, rest @ ..] => single_byte(rest, iso8859_5),
        [0x10, 0x00, n, rest @ ..] => match *n {
            1 => single_byte(rest, latin1),
            5 => single_byte(rest, iso8859_5),
            _ => {
                debug!(table = n, "ISO-8859 table not mapped, decoding as Latin-1");
                single_byte(rest, latin1)
            }
        },
        [0x11, rest @ ..] => ucs2(rest),
        [0x15, rest @ ..] => utf8(rest),
        [sel @ 0x02..=0x1F, rest @ ..] => {
            debug!(selector = sel, "character table not mapped, decoding as Latin-1");
            single_byte(rest, latin1)
        }
        _ => single_byte(raw, latin1),
    }
}

fn latin1(b: u8) -> char {
    b as char
}

fn iso8859_5(b: u8) -> char {
    match b {
        0x00..=0xA0 | 0xAD => b as char,
        0xF0 => '\u{2116}',
        0xFD => '\u{00A7}',
        _ => char::from_u32(0x360 + b as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
    }
}

/// Single-byte tables share the 0x80-0x9F control range.
fn single_byte(raw: &[u8], table: fn(u8) -> char) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        match b {
            0x8A => out.push('\n'),
            0x80..=0x9F => {}
            _ => out.push(table(b)),
        }
    }
    out
}

fn ucs2(raw: &[u8]) -> String {
    let units = raw
        .chunks_exact(2)
        .map(|p| u16::from_be_bytes([p[0], p[1]]))
        .filter_map(|u| match u {
            0xE08A => Some('\n' as u16),
            0xE080..=0xE09F => None,
            _ => Some(u),
        });
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn utf8(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter_map(|c| match c as u32 {
            0xE08A => Some('\n'),
            0xE080..=0xE09F => None,
            _ => Some(c),
        })
        .collect()
}
