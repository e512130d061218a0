use tracing::{debug, info, warn};

use crate::apdu;
use crate::cam::CamState;
use crate::constants::*;
use crate::device::CaDevice;
use crate::error::CamError;
use crate::interface::{ApduSink, CamInterface};
use crate::resources::application_info::{decode_application_info, AppInfo};
use crate::resources::conditional_access::ConditionalAccess;
use crate::resources::{Resource, ResourceId};
use crate::session::{Session, SessionId};
use crate::types::InterfaceKind;

/// High-level CI: the driver runs the lower layers, we exchange whole APDUs.
pub struct HighLevel {
    device: Box<dyn CaDevice>,
}

impl HighLevel {
    /// Needs a ready module in slot 0. Installs a Conditional Access session
    /// that accepts every CA system so `set_capmt` reaches the module.
    pub fn open(mut device: Box<dyn CaDevice>, state: &mut CamState) -> Result<Self, CamError> {
        let info = device.slot_info(0)?;
        if !info.module_ready() {
            return Err(CamError::NoModule);
        }

        let mut hl = Self { device };
        match hl.query_application_info() {
            Ok(Some(app)) => {
                info!(slot = 0, "CAM: {}, {:#06x}, {:#06x}", app.menu, app.manufacturer, app.code);
                if let Some(s) = state.slots.first_mut() {
                    s.app_info = Some(app);
                }
            }
            Ok(None) => debug!("CAM did not answer the application info query"),
            Err(e) => warn!("application info query failed ({e})"),
        }

        let id = state
            .sessions
            .next_free()
            .ok_or(CamError::SessionTableFull(state.sessions.capacity()))?;
        state.sessions.insert(id, Session {
            slot: 0,
            resource: Resource::ConditionalAccess(ConditionalAccess::accepting_all()),
            open: true,
        });
        if let Some(s) = state.slots.first_mut() {
            s.active = true;
        }
        info!("CAM uses high level CI, pseudo CA session {id}");
        Ok(hl)
    }

    fn send_msg(&mut self, tag: u32, data: &[u8]) -> Result<(), CamError> {
        let msg = apdu::encode(tag, data);
        if msg.len() > HLCI_MSG_SIZE {
            return Err(CamError::MessageTooLarge { len: msg.len(), max: HLCI_MSG_SIZE });
        }
        self.device.send_msg(&msg)?;
        Ok(())
    }

    fn query_application_info(&mut self) -> Result<Option<AppInfo>, CamError> {
        self.send_msg(AOT_APPLICATION_INFO_ENQ, &[])?;
        let mut buf = [0u8; HLCI_MSG_SIZE];
        let n = self.device.recv_msg(&mut buf)?;
        let msg = &buf[..n.min(HLCI_MSG_SIZE)];
        if apdu::get_tag(msg) != AOT_APPLICATION_INFO {
            return Ok(None);
        }
        Ok(Some(decode_application_info(apdu::payload(msg)?)?))
    }
}

impl ApduSink for HighLevel {
    fn send_apdu(&mut self, slot: u8, session: SessionId, tag: u32, data: &[u8]) -> Result<(), CamError> {
        debug!(slot, %session, "sending APDU {tag:06x} through CA_SEND_MSG");
        self.send_msg(tag, data)
    }

    fn request_close(&mut self, _slot: u8, _session: SessionId) -> Result<(), CamError> {
        Err(CamError::Unsupported("closing sessions on a high level interface"))
    }
}

impl CamInterface for HighLevel {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::HighLevel
    }

    fn sink(&mut self) -> &mut dyn ApduSink {
        self
    }

    fn poll(&mut self, _state: &mut CamState) {}

    fn request_session(
        &mut self,
        _state: &mut CamState,
        _slot: u8,
        _resource: ResourceId,
    ) -> Result<SessionId, CamError> {
        Err(CamError::Unsupported("session creation on a high level interface"))
    }

    fn shutdown(&mut self, state: &mut CamState) {
        for slot in 0..state.slots.len() as u8 {
            state.close_slot(slot);
        }
        state.programs.clear();
    }
}
