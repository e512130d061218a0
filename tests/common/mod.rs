//! Scripted in-memory CI device.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use en50221::codec::decode_length;
use en50221::constants::*;
use en50221::psi::{Descriptor, ElementaryStream, Pmt};
use en50221::transport::encode_tpdu;
use en50221::{apdu, CaCaps, CaDevice, CamConfig, SlotInfo};

#[derive(Default)]
pub struct Inner {
    pub caps: CaCaps,
    pub ready: Vec<bool>,
    /// SPDUs the module will hand out on `RCV`, per slot
    pub to_host: Vec<VecDeque<Vec<u8>>>,
    /// Complete SPDUs written by the host
    pub from_host: Vec<(u8, Vec<u8>)>,
    pub resets: Vec<u8>,
    pub create_tc: usize,
    /// Ignore `CREATE_TC` instead of answering it
    pub mute: bool,
    /// Answer `RCV` with `DATA_MORE`
    pub rcv_more: bool,
    /// Tags of the host's non-empty data TPDUs, in order
    pub data_tags: Vec<u8>,
    /// High-level messages sent by the host
    pub hl_sent: Vec<Vec<u8>>,
    pub hl_replies: VecDeque<Vec<u8>>,
    frames: VecDeque<Vec<u8>>,
    partial: Vec<u8>,
}

impl Inner {
    fn status_block(&self, slot: u8) -> [u8; 4] {
        let pending = self.to_host.get(slot as usize).is_some_and(|q| !q.is_empty());
        [T_SB, 2, slot + 1, if pending { DATA_INDICATOR } else { 0 }]
    }

    fn reply(&mut self, slot: u8, mut frame: Vec<u8>) {
        frame.extend_from_slice(&self.status_block(slot));
        self.frames.push_back(frame);
    }
}

#[derive(Clone)]
pub struct MockDevice(Arc<Mutex<Inner>>);

impl MockDevice {
    pub fn link_layer(slots: usize) -> Self {
        Self::with_caps(slots, CA_CI_LINK)
    }

    pub fn high_level() -> Self {
        Self::with_caps(1, CA_CI)
    }

    pub fn with_caps(slots: usize, slot_type: u32) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            caps: CaCaps { slot_num: slots as u32, slot_type },
            ready: vec![true; slots],
            to_host: vec![VecDeque::new(); slots],
            ..Default::default()
        })))
    }

    pub fn inner(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap()
    }

    pub fn boxed(&self) -> Box<dyn CaDevice> {
        Box::new(self.clone())
    }

    pub fn push_spdu(&self, slot: u8, spdu: &[u8]) {
        self.inner().to_host[slot as usize].push_back(spdu.to_vec());
    }

    pub fn push_apdu(&self, slot: u8, session: u16, tag: u32, data: &[u8]) {
        let mut spdu = vec![ST_SESSION_NUMBER, 2];
        spdu.extend_from_slice(&session.to_be_bytes());
        spdu.extend_from_slice(&apdu::encode(tag, data));
        self.push_spdu(slot, &spdu);
    }

    pub fn open_request(&self, slot: u8, resource: u32) {
        let mut spdu = vec![ST_OPEN_SESSION_REQUEST, 4];
        spdu.extend_from_slice(&resource.to_be_bytes());
        self.push_spdu(slot, &spdu);
    }

    pub fn take_sent(&self) -> Vec<(u8, Vec<u8>)> {
        std::mem::take(&mut self.inner().from_host)
    }

    /// APDUs the host sent inside session-number SPDUs, as `(session, apdu)`.
    pub fn take_apdus(&self) -> Vec<(u16, Vec<u8>)> {
        self.take_sent()
            .into_iter()
            .filter(|(_, spdu)| spdu.first() == Some(&ST_SESSION_NUMBER))
            .map(|(_, spdu)| (u16::from_be_bytes([spdu[2], spdu[3]]), spdu[4..].to_vec()))
            .collect()
    }

    pub fn set_ready(&self, slot: u8, ready: bool) {
        self.inner().ready[slot as usize] = ready;
    }
}

impl CaDevice for MockDevice {
    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner();
        let (slot, tag) = (frame[0], frame[2]);
        match tag {
            T_CREATE_TC => {
                inner.create_tc += 1;
                if !inner.mute {
                    inner.reply(slot, encode_tpdu(slot, T_CTC_REPLY, &[]).to_vec());
                }
            }
            T_DATA_LAST | T_DATA_MORE => {
                let (len, used) = decode_length(&frame[3..]).map_err(io::Error::other)?;
                let body = &frame[3 + used..3 + used + len as usize];
                if body.len() > 1 {
                    inner.data_tags.push(tag);
                }
                inner.partial.extend_from_slice(&body[1..]);
                if tag == T_DATA_LAST && !inner.partial.is_empty() {
                    let spdu = std::mem::take(&mut inner.partial);
                    inner.from_host.push((slot, spdu));
                }
                let sb = inner.status_block(slot);
                inner.frames.push_back(vec![slot, sb[2], sb[0], sb[1], sb[2], sb[3]]);
            }
            T_RCV => {
                let spdu = inner.to_host[slot as usize].pop_front().unwrap_or_default();
                let tag = if inner.rcv_more { T_DATA_MORE } else { T_DATA_LAST };
                inner.reply(slot, encode_tpdu(slot, tag, &spdu).to_vec());
            }
            _ => {}
        }
        Ok(frame.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame = self.inner().frames.pop_front().ok_or(io::ErrorKind::WouldBlock)?;
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.inner().frames.is_empty())
    }

    fn reset_slot(&mut self, slot: u8) -> io::Result<()> {
        self.inner().resets.push(slot);
        Ok(())
    }

    fn caps(&mut self) -> io::Result<CaCaps> {
        Ok(self.inner().caps)
    }

    fn slot_info(&mut self, slot: u8) -> io::Result<SlotInfo> {
        let inner = self.inner();
        let flags = if inner.ready[slot as usize] { CA_CI_MODULE_PRESENT | CA_CI_MODULE_READY } else { 0 };
        Ok(SlotInfo { slot_type: inner.caps.slot_type, flags })
    }

    fn send_msg(&mut self, msg: &[u8]) -> io::Result<()> {
        self.inner().hl_sent.push(msg.to_vec());
        Ok(())
    }

    fn recv_msg(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let msg = self.inner().hl_replies.pop_front().ok_or(io::ErrorKind::WouldBlock)?;
        buf[..msg.len()].copy_from_slice(&msg);
        Ok(msg.len())
    }
}

pub fn config() -> CamConfig {
    CamConfig {
        read_timeout_ms: 10,
        poll_interval_ms: 0,
        create_tc_retries: 3,
        ..CamConfig::default()
    }
}

/// Program with one video stream and a CA descriptor per system id.
pub fn scrambled_pmt(program_number: u16, version: u8, ca_systems: &[u16]) -> Pmt {
    Pmt {
        program_number,
        version,
        current_next: true,
        pcr_pid: 0x100,
        descriptors: ca_systems.iter().map(|id| Descriptor::ca(*id, 0x1500)).collect(),
        streams: vec![ElementaryStream { stream_type: 0x02, elementary_pid: 0x101, descriptors: vec![] }],
    }
}

pub fn clear_pmt(program_number: u16) -> Pmt {
    scrambled_pmt(program_number, 0, &[])
}
