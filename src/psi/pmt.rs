use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::constants::CA_DESCRIPTOR_TAG;
use crate::psi::section::SectionReader;

/// ─────────── descriptors ───────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag:  u8,
    pub data: Vec<u8>,     // at most 255 bytes
}

impl Descriptor {
    pub fn new(tag: u8, data: impl Into<Vec<u8>>) -> Self {
        let mut data = data.into();
        data.truncate(u8::MAX as usize);
        Self { tag, data }
    }

    pub fn ca(ca_system_id: u16, ca_pid: u16) -> Self {
        let [a, b] = ca_system_id.to_be_bytes();
        let [c, d] = (0xE000 | ca_pid).to_be_bytes();
        Self::new(CA_DESCRIPTOR_TAG, vec![a, b, c, d])
    }

    /// CA_system_ID of a CA descriptor (tag 0x09).
    pub fn ca_system_id(&self) -> Option<u16> {
        if self.tag != CA_DESCRIPTOR_TAG { return None; }
        match self.data[..] {
            [hi, lo, ..] => Some(u16::from_be_bytes([hi, lo])),
            _ => None,
        }
    }
}

/// ─────────── PMT ───────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version:        u8,
    pub current_next:   bool,
    pub pcr_pid:        u16,
    pub descriptors:    Vec<Descriptor>,
    pub streams:        Vec<ElementaryStream>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStream {
    pub stream_type:    u8,
    pub elementary_pid: u16,
    pub descriptors:    Vec<Descriptor>,
}

impl Pmt {
    /// A CA descriptor at program level or on any elementary stream.
    pub fn needs_descrambling(&self) -> bool {
        let is_ca = |d: &Descriptor| d.tag == CA_DESCRIPTOR_TAG;
        self.descriptors.iter().any(is_ca)
            || self.streams.iter().any(|es| es.descriptors.iter().any(is_ca))
    }
}

/// TS payload (pointer field first).
pub fn parse_pmt(payload: &[u8]) -> anyhow::Result<Pmt> {
    pmt_from(SectionReader::new(payload)?)
}

/// Bare section (table_id first), e.g. read from a file.
pub fn parse_pmt_section(section: &[u8]) -> anyhow::Result<Pmt> {
    pmt_from(SectionReader::from_section(section)?)
}

fn pmt_from(sec: SectionReader<'_>) -> anyhow::Result<Pmt> {
    if sec.table_id != 0x02 { anyhow::bail!("not PMT"); }
    let b = sec.body;
    if b.len() < 4 { anyhow::bail!("PMT body too short"); }

    /* ── fixed header inside the body ── */
    let mut br = BitReader::endian(&b[..4], BigEndian);
    br.skip(3)?;
    let pcr_pid: u16       = br.read::<13, u16>()?;
    br.skip(4)?;
    let prog_info_len      = br.read::<12, u16>()? as usize;
    let mut idx            = 4 + prog_info_len;
    if idx > b.len() { anyhow::bail!("truncated program descriptors"); }
    let descriptors        = parse_descriptors(&b[4..idx])?;

    /* ── ES loop ── */
    let mut streams = Vec::new();
    while idx + 5 <= b.len() {
        let stype = b[idx];
        let pid   = (((b[idx+1] & 0x1F) as u16) << 8) | (b[idx+2] as u16);
        let eslen = (((b[idx+3] & 0x0F) as usize) << 8) | (b[idx+4] as usize);
        let end   = idx + 5 + eslen;
        if end > b.len() { anyhow::bail!("truncated ES descriptors for PID {pid:#06x}"); }
        streams.push(ElementaryStream{
            stream_type: stype,
            elementary_pid: pid,
            descriptors: parse_descriptors(&b[idx+5..end])?,
        });
        idx = end;
    }

    Ok(Pmt{ program_number: sec.table_id_ext,
            version: sec.version,
            current_next: sec.current_next,
            pcr_pid,
            descriptors,
            streams })
}

fn parse_descriptors(mut b: &[u8]) -> anyhow::Result<Vec<Descriptor>> {
    let mut out = Vec::new();
    while let [tag, len, rest @ ..] = b {
        let Some((data, tail)) = rest.split_at_checked(*len as usize) else {
            anyhow::bail!("descriptor {tag:#04x} overruns loop");
        };
        out.push(Descriptor { tag: *tag, data: data.to_vec() });
        b = tail;
    }
    Ok(out)
}
