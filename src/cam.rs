//! Device-wide state and the public entry points.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::CamConfig;
use crate::constants::*;
use crate::device::CaDevice;
use crate::error::CamError;
use crate::interface::{ApduSink, CamInterface, HighLevel, LinkLayer};
use crate::psi::Pmt;
use crate::report::Reporter;
use crate::resources::conditional_access::{ProgramTable, Selection};
use crate::resources::mmi::MmiObject;
use crate::resources::{application_info, Ctx, Resource, ResourceId};
use crate::session::{Session, SessionId, SessionTable};
use crate::types::{CamStatus, InterfaceKind, SlotState};

/// Sessions, slot flags and selected programs of one device.
#[derive(Debug)]
pub struct CamState {
    pub sessions: SessionTable,
    pub slots: Vec<SlotState>,
    pub programs: ProgramTable,
}

impl CamState {
    pub fn new(slots: usize, config: &CamConfig) -> Self {
        Self {
            sessions: SessionTable::new(config.max_sessions),
            slots: vec![SlotState::default(); slots],
            programs: ProgramTable::new(config.max_programs),
        }
    }

    /// Runs `f` on a session's resource with a context borrowing the rest of
    /// the state. `None` if the session or its slot does not exist.
    pub fn with_session<R>(
        &mut self,
        sink: &mut dyn ApduSink,
        id: SessionId,
        f: impl FnOnce(&mut Resource, &mut Ctx<'_>) -> R,
    ) -> Option<R> {
        let Self { sessions, slots, programs } = self;
        let session = sessions.get_mut(id)?;
        let slot = session.slot;
        let slot_state = slots.get_mut(slot as usize)?;
        let mut ctx = Ctx { sink, slot_state, programs, slot, session: id };
        Some(f(&mut session.resource, &mut ctx))
    }

    pub fn dispatch_apdu(&mut self, sink: &mut dyn ApduSink, id: SessionId, apdu: &[u8]) {
        let res = self.with_session(sink, id, |res, ctx| {
            res.handle(ctx, apdu).map_err(|e| (res.name(), e))
        });
        match res {
            Some(Ok(())) => {}
            Some(Err((name, e))) => error!(session = %id, "{name}: {e}"),
            None => error!(session = %id, "APDU for unknown session"),
        }
    }

    pub fn open_resource(&mut self, sink: &mut dyn ApduSink, id: SessionId) {
        let res = self.with_session(sink, id, |res, ctx| {
            res.open(ctx).map_err(|e| (res.name(), e))
        });
        if let Some(Err((name, e))) = res {
            error!(session = %id, "opening {name}: {e}");
        }
    }

    /// Frees a session and lets its resource clean up.
    pub fn release_session(&mut self, id: SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(id)?;
        if let Some(slot_state) = self.slots.get_mut(session.slot as usize) {
            session.resource.close(slot_state);
        }
        debug!(slot = session.slot, session = %id, "{} session released", session.resource.name());
        Some(session)
    }

    /// Module gone: drop every session on the slot and reset its flags.
    pub fn close_slot(&mut self, slot: u8) {
        for id in self.sessions.ids_on_slot(slot) {
            self.release_session(id);
        }
        if let Some(s) = self.slots.get_mut(slot as usize) {
            s.reset();
        }
    }

    /// Periodic work of every open session.
    pub fn manage(&mut self, sink: &mut dyn ApduSink, now: Instant) {
        let open: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.open)
            .map(|(id, _)| id)
            .collect();
        for id in open {
            if let Some(Err(e)) = self.with_session(sink, id, |res, ctx| res.manage(ctx, now)) {
                error!(session = %id, "{e}");
            }
        }
    }

    /// Records a program selection change and fans the resulting CA_PMT out
    /// to every open Conditional Access session.
    pub fn set_capmt(&mut self, sink: &mut dyn ApduSink, pmt: Pmt) {
        let program = pmt.program_number;
        let selection = self.programs.select(pmt);
        match &selection {
            Selection::Unchanged => {
                debug!(program, "PMT unchanged");
                return;
            }
            Selection::Ignored => {
                debug!(program, "program needs no descrambling");
                return;
            }
            Selection::Full => {
                warn!(program, "too many selected programs");
                return;
            }
            _ => {}
        }

        let ca_sessions: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.open && s.resource.id() == ResourceId::CONDITIONAL_ACCESS)
            .map(|(id, _)| id)
            .collect();
        for id in ca_sessions {
            let res = self.with_session(sink, id, |res, ctx| {
                let Resource::ConditionalAccess(ca) = res else { return Ok(()) };
                match &selection {
                    Selection::Added(p) => ca.add(ctx, p),
                    Selection::Updated(p) => ca.update(ctx, p),
                    Selection::Removed(p) => ca.delete(ctx, p),
                    _ => Ok(()),
                }
            });
            if let Some(Err(e)) = res {
                error!(session = %id, program, "CA_PMT not sent ({e})");
            }
        }
    }
}

/// An opened CI device.
pub struct Cam {
    iface: Box<dyn CamInterface>,
    state: CamState,
}

impl Cam {
    /// Queries the device capabilities and picks the interface flavour.
    pub fn open(mut device: Box<dyn CaDevice>, config: CamConfig) -> Result<Self, CamError> {
        config.validate().map_err(|e| CamError::InvalidConfig(format!("{e:#}")))?;
        let caps = device.caps().map_err(CamError::Caps)?;
        if caps.slot_num == 0 {
            return Err(CamError::NoSlots);
        }
        let slots = (caps.slot_num as usize).min(config.max_slots).min(u8::MAX as usize);
        let mut state = CamState::new(slots, &config);

        let iface: Box<dyn CamInterface> = if caps.slot_type & CA_CI_LINK != 0 {
            info!(slots, "CAM uses link-layer CI");
            Box::new(LinkLayer::new(device, slots as u8, &config))
        } else if caps.slot_type & CA_CI != 0 {
            Box::new(HighLevel::open(device, &mut state)?)
        } else {
            return Err(CamError::UnsupportedInterface(caps.slot_type));
        };

        Ok(Self { iface, state })
    }

    #[cfg(target_os = "linux")]
    pub fn open_path(path: impl AsRef<std::path::Path>, config: CamConfig) -> Result<Self, CamError> {
        let device = crate::device::LinuxCaDevice::open(path)?;
        Self::open(Box::new(device), config)
    }

    pub fn kind(&self) -> InterfaceKind {
        self.iface.kind()
    }

    pub fn state(&self) -> &CamState {
        &self.state
    }

    pub fn poll(&mut self) {
        self.iface.poll(&mut self.state);
    }

    pub fn set_capmt(&mut self, pmt: Pmt) {
        self.state.set_capmt(self.iface.sink(), pmt);
    }

    fn check_slot(&self, slot: u8) -> Result<(), CamError> {
        if (slot as usize) < self.state.slots.len() {
            Ok(())
        } else {
            Err(CamError::InvalidSlot(slot))
        }
    }

    /// Asks the module on `slot` to open its menu.
    pub fn open_mmi(&mut self, slot: u8) -> Result<(), CamError> {
        self.check_slot(slot)?;
        if self.state.sessions.find(slot, ResourceId::MMI).is_some() {
            return Err(CamError::MmiAlreadyOpen(slot));
        }
        let ai = self
            .state
            .sessions
            .find(slot, ResourceId::APPLICATION_INFORMATION)
            .ok_or(CamError::NoApplicationInfo(slot))?;
        self.state
            .with_session(self.iface.sink(), ai, |_, ctx| application_info::enter_menu(ctx))
            .unwrap_or(Err(CamError::UnknownSession(ai.get())))
    }

    pub fn close_mmi(&mut self, slot: u8) -> Result<(), CamError> {
        self.check_slot(slot)?;
        let Some(id) = self.state.sessions.find(slot, ResourceId::MMI) else {
            warn!(slot, "closing a non-existing MMI session");
            return Err(CamError::NoMmiSession(slot));
        };
        debug!(slot, session = %id, "closing MMI session");
        self.iface.sink().request_close(slot, id)
    }

    /// Current MMI object, `None` while the module owes us a reply.
    pub fn get_mmi_object(&self, slot: u8) -> Option<&MmiObject> {
        let state = self.state.slots.get(slot as usize)?;
        if state.mmi_expected {
            return None;
        }
        let id = self.state.sessions.find(slot, ResourceId::MMI)?;
        match &self.state.sessions.get(id)?.resource {
            Resource::Mmi(mmi) if !mmi.object().is_none() => Some(mmi.object()),
            _ => None,
        }
    }

    /// True once per new MMI object.
    pub fn mmi_undisplayed(&self, slot: u8) -> bool {
        self.state.slots.get(slot as usize).is_some_and(|s| s.mmi_undisplayed)
    }

    pub fn acknowledge_mmi(&mut self, slot: u8) {
        if let Some(s) = self.state.slots.get_mut(slot as usize) {
            s.mmi_undisplayed = false;
        }
    }

    pub fn send_mmi_object(&mut self, slot: u8, object: &MmiObject) -> Result<(), CamError> {
        self.check_slot(slot)?;
        let id = self
            .state
            .sessions
            .find(slot, ResourceId::MMI)
            .ok_or(CamError::NoMmiSession(slot))?;
        self.state
            .with_session(self.iface.sink(), id, |res, ctx| match res {
                Resource::Mmi(mmi) => mmi.send_object(ctx, object),
                _ => Err(CamError::NoMmiSession(slot)),
            })
            .unwrap_or(Err(CamError::UnknownSession(id.get())))
    }

    /// Host-initiated session; live once the module accepts it.
    pub fn request_session(&mut self, slot: u8, resource: ResourceId) -> Result<SessionId, CamError> {
        self.check_slot(slot)?;
        self.iface.request_session(&mut self.state, slot, resource)
    }

    pub fn status(&self) -> CamStatus {
        Reporter::create_status(self.iface.kind(), &self.state)
    }

    /// Closes all sessions and forgets selected programs. The device itself is
    /// released when the `Cam` is dropped.
    pub fn shutdown(&mut self) {
        info!("shutting down CAM");
        self.iface.shutdown(&mut self.state);
    }
}
