// psi/section.rs
//! Generic PSI section reader with CRC-32 (MPEG-2) validation.

use crc::{Crc, CRC_32_MPEG_2};

/// Returned by [`SectionReader::new`] and [`SectionReader::from_section`].
pub struct SectionReader<'a> {
    pub table_id:      u8,
    pub version:       u8,
    pub current_next:  bool,
    pub section_number:u8,
    pub last_section:  u8,
    pub table_id_ext:  u16,
    pub body:          &'a [u8],   // bytes between fixed header & CRC
}

pub(crate) const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

impl<'a> SectionReader<'a> {
    /// TS payload form: skips the pointer field first.
    pub fn new(payload: &'a [u8]) -> anyhow::Result<Self> {
        if payload.is_empty() { anyhow::bail!("payload empty") }
        let pointer = payload[0] as usize;
        let start   = 1 + pointer;
        if payload.len() < start { anyhow::bail!("pointer field past end of payload") }
        Self::from_section(&payload[start..])
    }

    /// Validates section length and CRC-32 of a section starting at `table_id`.
    pub fn from_section(section: &'a [u8]) -> anyhow::Result<Self> {
        if section.len() < 8 { anyhow::bail!("short section") }

        let table_id = section[0];
        let sec_len  = ((section[1] & 0x0F) as usize) << 8 | section[2] as usize;
        if sec_len < 9 { anyhow::bail!("invalid section_length") }
        let end      = 3 + sec_len;
        if end > section.len() { anyhow::bail!("truncated section") }

        let crc_calc = CRC_MPEG.checksum(&section[..end-4]);
        let crc_pkt  = u32::from_be_bytes(section[end-4..end].try_into()?);
        if crc_calc != crc_pkt {
            anyhow::bail!("CRC-32 mismatch");
        }

        Ok(Self {
            table_id,
            version:       (section[5] & 0x3E) >> 1,
            current_next:  section[5] & 0x01 != 0,
            section_number:section[6],
            last_section:  section[7],
            table_id_ext:  u16::from_be_bytes([section[3], section[4]]),
            body:          &section[8 .. end-4],
        })
    }
}
