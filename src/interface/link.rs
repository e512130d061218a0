use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::cam::CamState;
use crate::config::CamConfig;
use crate::constants::*;
use crate::device::CaDevice;
use crate::error::CamError;
use crate::interface::{ApduSink, CamInterface};
use crate::resources::ResourceId;
use crate::session::{self, SessionId};
use crate::transport::Transport;
use crate::types::InterfaceKind;

/// Link-layer CI: TPDUs over the device's byte stream.
pub struct LinkLayer {
    transport: Transport,
    slots: u8,
    create_tc_retries: u32,
    poll_interval: Duration,
    next_poll: Instant,
}

impl LinkLayer {
    pub fn new(device: Box<dyn CaDevice>, slots: u8, config: &CamConfig) -> Self {
        Self {
            transport: Transport::new(
                device,
                slots as usize,
                config.read_timeout(),
                config.max_tpdu_size,
                config.dump_tpdu,
            ),
            slots,
            create_tc_retries: config.create_tc_retries,
            poll_interval: config.poll_interval(),
            next_poll: Instant::now(),
        }
    }

    /// `CREATE_TC` until the module answers `CTC_REPLY`.
    fn init_slot(&mut self, slot: u8) -> Result<(), CamError> {
        self.transport.send(slot, T_CREATE_TC, &[])?;
        for _ in 0..self.create_tc_retries {
            match self.transport.recv(slot) {
                Ok(tpdu) if tpdu.tag == T_CTC_REPLY => return Ok(()),
                Ok(tpdu) => debug!(slot, tag = tpdu.tag, "waiting for CTC_REPLY"),
                Err(e) => debug!(slot, "no CTC_REPLY yet ({e})"),
            }
            if let Err(e) = self.transport.send(slot, T_CREATE_TC, &[]) {
                error!(slot, "couldn't send CREATE_TC ({e})");
            }
        }
        Err(CamError::CreateTc(slot))
    }

    fn poll_slot(&mut self, state: &mut CamState, slot: u8) {
        let info = match self.transport.device().slot_info(slot) {
            Ok(info) => info,
            Err(e) => {
                error!(slot, "couldn't get slot info ({e})");
                return;
            }
        };
        let active = state.slots.get(slot as usize).is_some_and(|s| s.active);

        if !info.module_ready() {
            if active {
                info!(slot, "CAM removed");
                state.close_slot(slot);
                self.transport.clear(slot);
            }
            return;
        }

        if !active {
            debug!(slot, "slot is active, creating transport connection");
            if let Err(e) = self.init_slot(slot) {
                error!(slot, "{e}, resetting");
                if let Err(e) = self.transport.device().reset_slot(slot) {
                    error!(slot, "couldn't reset slot ({e})");
                }
                return;
            }
            if let Some(s) = state.slots.get_mut(slot as usize) {
                s.active = true;
            }
        }

        if !self.transport.has_data(slot) {
            if let Err(e) = self.transport.exchange(slot, T_DATA_LAST, &[]) {
                error!(slot, "couldn't poll module ({e})");
                return;
            }
        }

        while self.transport.has_data(slot) {
            let tpdu = match self.transport.exchange(slot, T_RCV, &[]) {
                Ok(tpdu) => tpdu,
                Err(e) => {
                    error!(slot, "couldn't receive TPDU ({e})");
                    break;
                }
            };
            match tpdu.tag {
                T_DATA_LAST if tpdu.data.is_empty() => {}
                T_DATA_LAST => session::dispatch(&mut self.transport, state, slot, &tpdu.data),
                T_DATA_MORE => {
                    error!(slot, "fragmented TPDU not supported");
                    break;
                }
                T_SB => {}
                tag => {
                    warn!(slot, tag, "unexpected TPDU");
                    break;
                }
            }
        }
    }
}

impl CamInterface for LinkLayer {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::LinkLayer
    }

    fn sink(&mut self) -> &mut dyn ApduSink {
        &mut self.transport
    }

    fn poll(&mut self, state: &mut CamState) {
        let now = Instant::now();
        if now < self.next_poll {
            return;
        }
        for slot in 0..self.slots {
            self.poll_slot(state, slot);
        }
        state.manage(&mut self.transport, now);
        self.next_poll = Instant::now() + self.poll_interval;
    }

    fn request_session(
        &mut self,
        state: &mut CamState,
        slot: u8,
        resource: ResourceId,
    ) -> Result<SessionId, CamError> {
        if !state.slots.get(slot as usize).is_some_and(|s| s.active) {
            return Err(CamError::InvalidSlot(slot));
        }
        session::create_session(&mut self.transport, state, slot, resource)
    }

    fn shutdown(&mut self, state: &mut CamState) {
        for id in state.sessions.ids() {
            let Some(slot) = state.sessions.get(id).map(|s| s.slot) else { continue };
            if let Err(e) = self.transport.request_close(slot, id) {
                warn!(slot, session = %id, "couldn't close session ({e})");
            }
        }
        for slot in 0..self.slots {
            state.close_slot(slot);
            self.transport.clear(slot);
        }
        state.programs.clear();
    }
}
