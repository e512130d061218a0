//! Conditional Access support: CA system negotiation and CA_PMT.

use bytes::{BufMut, BytesMut};
use tracing::{debug, warn};

use crate::apdu;
use crate::constants::*;
use crate::error::{CamError, ParseError};
use crate::psi::{Descriptor, Pmt};
use crate::resources::Ctx;

/// Upper bound on CA_system_IDs kept per session
pub const MAX_CASYSTEM_IDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListManagement {
    More   = 0x00,
    First  = 0x01,
    Last   = 0x02,
    Only   = 0x03,
    Add    = 0x04,
    Update = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaPmtCmd {
    OkDescrambling = 0x01,
    OkMmi          = 0x02,
    Query          = 0x03,
    NotSelected    = 0x04,
}

/// CA systems a module declared in CA_INFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaSystems {
    /// High-level interfaces never report a list
    Any,
    Only(Vec<u16>),
}

impl Default for CaSystems {
    fn default() -> Self {
        Self::Only(Vec::new())
    }
}

impl CaSystems {
    pub fn accepts(&self, id: u16) -> bool {
        match self {
            Self::Any => true,
            Self::Only(ids) => ids.contains(&id),
        }
    }
}

fn matching<'p>(systems: &'p CaSystems, descriptors: &'p [Descriptor]) -> impl Iterator<Item = &'p Descriptor> {
    descriptors
        .iter()
        .filter(move |d| d.ca_system_id().is_some_and(|id| systems.accepts(id)))
}

fn cad_size(systems: &CaSystems, descriptors: &[Descriptor]) -> usize {
    matching(systems, descriptors).map(|d| d.data.len() + 2).sum()
}

/// `ca_info_length | cmd | CA descriptors`, or a zero length when nothing matches.
fn put_ca_info(out: &mut BytesMut, systems: &CaSystems, descriptors: &[Descriptor], size: usize, cmd: CaPmtCmd) {
    if size == 0 {
        out.put_u16(0);
        return;
    }
    out.put_u16((size + 1) as u16);
    out.put_u8(cmd as u8);
    for d in matching(systems, descriptors) {
        out.put_u8(d.tag);
        out.put_u8(d.data.len() as u8);
        out.put_slice(&d.data);
    }
}

/// Builds the body of a CA_PMT object. Only CA descriptors of systems the
/// module supports are kept; `None` when no descriptor survives.
pub fn build_ca_pmt(pmt: &Pmt, systems: &CaSystems, list: ListManagement, cmd: CaPmtCmd) -> Option<BytesMut> {
    let program_cad = cad_size(systems, &pmt.descriptors);
    let total = program_cad
        + pmt.streams.iter().map(|es| cad_size(systems, &es.descriptors)).sum::<usize>();
    if total == 0 {
        return None;
    }

    let mut out = BytesMut::with_capacity(6 + total + 6 * pmt.streams.len());
    out.put_u8(list as u8);
    out.put_u16(pmt.program_number);
    out.put_u8(((pmt.version & 0x1F) << 1) | 0x01);
    put_ca_info(&mut out, systems, &pmt.descriptors, program_cad, cmd);

    for es in &pmt.streams {
        let es_cad = cad_size(systems, &es.descriptors);
        // a clear stream is listed only once the program itself carries a command
        if es_cad == 0 && program_cad == 0 {
            continue;
        }
        out.put_u8(es.stream_type);
        out.put_u16(es.elementary_pid);
        put_ca_info(&mut out, systems, &es.descriptors, es_cad, cmd);
    }
    Some(out)
}

/// Private state of a Conditional Access session.
#[derive(Debug, Default)]
pub struct ConditionalAccess {
    systems: CaSystems,
    /// Programs this module currently knows about
    selected: usize,
}

impl ConditionalAccess {
    /// Pseudo session of high-level interfaces.
    pub fn accepting_all() -> Self {
        Self { systems: CaSystems::Any, selected: 0 }
    }

    pub fn systems(&self) -> &CaSystems {
        &self.systems
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn open(&mut self, ctx: &mut Ctx<'_>) -> Result<(), CamError> {
        debug!(slot = ctx.slot, session = %ctx.session, "opening ConditionalAccess session");
        ctx.send(AOT_CA_INFO_ENQ, &[])
    }

    pub fn handle(&mut self, ctx: &mut Ctx<'_>, apdu: &[u8]) -> Result<(), CamError> {
        match apdu::get_tag(apdu) {
            AOT_CA_INFO => {
                let data = apdu::payload(apdu)?;
                let mut ids: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|p| u16::from_be_bytes([p[0], p[1]]))
                    .collect();
                if ids.len() > MAX_CASYSTEM_IDS {
                    warn!(slot = ctx.slot, count = ids.len(), "too many CA system IDs, keeping {MAX_CASYSTEM_IDS}");
                    ids.truncate(MAX_CASYSTEM_IDS);
                }
                debug!(slot = ctx.slot, "CA system IDs supported by the application: {ids:04x?}");
                self.systems = CaSystems::Only(ids);

                // the module may open this session after programs were selected
                self.selected = 0;
                let programs = ctx.programs;
                for pmt in programs.iter() {
                    self.add(ctx, pmt)?;
                }
                Ok(())
            }
            AOT_CA_PMT_REPLY => {
                let data = apdu::payload(apdu)?;
                let program = data.get(..2).map(|b| u16::from_be_bytes([b[0], b[1]]));
                debug!(slot = ctx.slot, ?program, "CA_PMT reply {:02x?}", data.get(2..).unwrap_or_default());
                Ok(())
            }
            tag => Err(ParseError::UnexpectedTag(tag).into()),
        }
    }

    /// Sends one CA_PMT; `Ok(false)` when nothing was sent.
    fn send_ca_pmt(&self, ctx: &mut Ctx<'_>, pmt: &Pmt, list: ListManagement, cmd: CaPmtCmd) -> Result<bool, CamError> {
        let Some(capmt) = build_ca_pmt(pmt, &self.systems, list, cmd) else {
            warn!(
                slot = ctx.slot,
                session = %ctx.session,
                "no compatible scrambling system for SID {}",
                pmt.program_number
            );
            return Ok(false);
        };
        ctx.send(AOT_CA_PMT, &capmt)?;
        Ok(true)
    }

    pub fn first(&mut self, ctx: &mut Ctx<'_>, pmt: &Pmt) -> Result<(), CamError> {
        debug!(slot = ctx.slot, session = %ctx.session, "adding first CA_PMT for SID {}", pmt.program_number);
        if self.send_ca_pmt(ctx, pmt, ListManagement::Only, CaPmtCmd::OkDescrambling)? {
            self.selected = 1;
        }
        Ok(())
    }

    pub fn add(&mut self, ctx: &mut Ctx<'_>, pmt: &Pmt) -> Result<(), CamError> {
        if self.selected == 0 {
            return self.first(ctx, pmt);
        }
        debug!(slot = ctx.slot, session = %ctx.session, "adding CA_PMT for SID {}", pmt.program_number);
        if self.send_ca_pmt(ctx, pmt, ListManagement::Add, CaPmtCmd::OkDescrambling)? {
            self.selected += 1;
        }
        Ok(())
    }

    pub fn update(&mut self, ctx: &mut Ctx<'_>, pmt: &Pmt) -> Result<(), CamError> {
        debug!(slot = ctx.slot, session = %ctx.session, "updating CA_PMT for SID {}", pmt.program_number);
        self.send_ca_pmt(ctx, pmt, ListManagement::Update, CaPmtCmd::OkDescrambling)?;
        Ok(())
    }

    pub fn delete(&mut self, ctx: &mut Ctx<'_>, pmt: &Pmt) -> Result<(), CamError> {
        debug!(slot = ctx.slot, session = %ctx.session, "deleting CA_PMT for SID {}", pmt.program_number);
        if self.send_ca_pmt(ctx, pmt, ListManagement::Update, CaPmtCmd::NotSelected)? {
            match self.selected.checked_sub(1) {
                Some(n) => self.selected = n,
                None => warn!(slot = ctx.slot, "CA_PMT delete for SID {} with no program selected", pmt.program_number),
            }
        }
        Ok(())
    }
}

/// Outcome of [`ProgramTable::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Added(Pmt),
    Updated(Pmt),
    /// Carries the entry that was stored
    Removed(Pmt),
    Unchanged,
    /// Clear program that was never selected
    Ignored,
    Full,
}

/// Programs currently selected for descrambling, keyed by program number.
#[derive(Debug, Clone)]
pub struct ProgramTable {
    programs: Vec<Pmt>,
    capacity: usize,
}

impl ProgramTable {
    pub fn new(capacity: usize) -> Self {
        Self { programs: Vec::with_capacity(capacity), capacity }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pmt> {
        self.programs.iter()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn clear(&mut self) {
        self.programs.clear();
    }

    pub fn select(&mut self, pmt: Pmt) -> Selection {
        let scrambled = pmt.needs_descrambling();
        let pos = self.programs.iter().position(|p| p.program_number == pmt.program_number);
        match pos {
            Some(i) if !scrambled => Selection::Removed(self.programs.remove(i)),
            Some(i) if self.programs[i] == pmt => Selection::Unchanged,
            Some(i) => {
                self.programs[i] = pmt.clone();
                Selection::Updated(pmt)
            }
            None if !scrambled => Selection::Ignored,
            None if self.programs.len() >= self.capacity => Selection::Full,
            None => {
                self.programs.push(pmt.clone());
                Selection::Added(pmt)
            }
        }
    }
}
