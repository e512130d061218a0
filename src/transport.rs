//! Transport layer: TPDU framing over the half-duplex link device.
//!
//! Every exchange is strictly send-then-receive. The transport connection id
//! of a slot is always `slot + 1`.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{error, trace};

use crate::codec::{decode_length, put_length};
use crate::constants::*;
use crate::device::CaDevice;
use crate::error::CamError;

pub fn tcid(slot: u8) -> u8 {
    slot.wrapping_add(1)
}

/// A received TPDU: its tag and the bytes following the tcid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tpdu {
    pub tag: u8,
    pub data: Bytes,
}

/// Builds one TPDU frame. `payload` is ignored for control tags and must
/// fit in `max_tpdu_size - 4` bytes for data tags.
pub fn encode_tpdu(slot: u8, tag: u8, payload: &[u8]) -> BytesMut {
    let tc = tcid(slot);
    let mut frame = BytesMut::with_capacity(payload.len() + 9);
    frame.put_u8(slot);
    frame.put_u8(tc);
    frame.put_u8(tag);

    match tag {
        T_RCV | T_CREATE_TC | T_CTC_REPLY | T_DELETE_TC | T_DTC_REPLY | T_REQUEST_TC => {
            frame.put_u8(1);
            frame.put_u8(tc);
        }
        T_NEW_TC | T_TC_ERROR => {
            frame.put_u8(2);
            frame.put_u8(tc);
            frame.put_u8(payload.first().copied().unwrap_or(0));
        }
        T_DATA_LAST | T_DATA_MORE => {
            put_length(&mut frame, payload.len() as u32 + 1);
            frame.put_u8(tc);
            frame.put_slice(payload);
        }
        _ => {}
    }
    frame
}

/// Splits a received frame, checking the tcid and the declared body length.
pub fn decode_tpdu(slot: u8, frame: &[u8]) -> Result<Tpdu, CamError> {
    if frame.len() < 5 {
        return Err(CamError::ShortFrame(frame.len()));
    }
    let expected = tcid(slot);
    if frame[1] != expected {
        return Err(CamError::UnexpectedTcid { expected, got: frame[1] });
    }

    let tag = frame[2];
    let (len, used) = decode_length(&frame[3..])?;
    let start = 3 + used;
    let body = frame
        .get(start..start + len as usize)
        .ok_or(CamError::ShortFrame(frame.len()))?;
    // body[0] repeats the tcid
    let data = body.get(1..).map(Bytes::copy_from_slice).unwrap_or_default();
    Ok(Tpdu { tag, data })
}

/// True when the trailing status block says the module has more to send.
pub fn has_pending_data(frame: &[u8]) -> bool {
    let n = frame.len();
    n >= 4 && frame[n - 4] == T_SB && frame[n - 3] == 2 && frame[n - 1] & DATA_INDICATOR != 0
}

struct Dump<'a>(&'a [u8]);

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter().take(MAX_DUMP) {
            write!(f, "{b:02X} ")?;
        }
        if self.0.len() >= MAX_DUMP {
            f.write_str("...")?;
        }
        Ok(())
    }
}

pub struct Transport {
    device: Box<dyn CaDevice>,
    has_data: Vec<bool>,
    read_timeout: Duration,
    max_tpdu_size: usize,
    dump: bool,
}

impl Transport {
    pub fn new(
        device: Box<dyn CaDevice>,
        slots: usize,
        read_timeout: Duration,
        max_tpdu_size: usize,
        dump: bool,
    ) -> Self {
        Self { device, has_data: vec![false; slots], read_timeout, max_tpdu_size, dump }
    }

    pub fn device(&mut self) -> &mut dyn CaDevice {
        self.device.as_mut()
    }

    /// Payload room of one data TPDU, never 0.
    pub fn max_data(&self) -> usize {
        self.max_tpdu_size.saturating_sub(TPDU_HEADER_OVERHEAD).max(1)
    }

    pub fn has_data(&self, slot: u8) -> bool {
        self.has_data.get(slot as usize).copied().unwrap_or(false)
    }

    pub fn clear(&mut self, slot: u8) {
        if let Some(flag) = self.has_data.get_mut(slot as usize) {
            *flag = false;
        }
    }

    pub fn send(&mut self, slot: u8, tag: u8, payload: &[u8]) -> Result<(), CamError> {
        let frame = encode_tpdu(slot, tag, payload);
        if self.dump {
            trace!(slot, "--> {}", Dump(&frame[..]));
        }

        let n = self.device.write(&frame).map_err(|e| {
            error!(slot, "cannot write to CAM device ({e})");
            CamError::Io(e)
        })?;
        if n != frame.len() {
            error!(slot, written = n, size = frame.len(), "short write to CAM device");
            return Err(CamError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        Ok(())
    }

    pub fn recv(&mut self, slot: u8) -> Result<Tpdu, CamError> {
        if !self.device.wait_readable(self.read_timeout)? {
            error!(slot, "cannot poll from CAM device");
            return Err(CamError::Timeout(self.read_timeout));
        }

        let mut buf = vec![0u8; self.max_tpdu_size];
        let n = self.device.read(&mut buf)?;
        let frame = &buf[..n];
        if self.dump {
            trace!(slot, "<-- {}", Dump(frame));
        }

        let tpdu = decode_tpdu(slot, frame).inspect_err(|e| error!(slot, "{e}"))?;
        if let Some(flag) = self.has_data.get_mut(slot as usize) {
            *flag = has_pending_data(frame);
        }
        Ok(tpdu)
    }

    /// One send/recv pair.
    pub fn exchange(&mut self, slot: u8, tag: u8, payload: &[u8]) -> Result<Tpdu, CamError> {
        self.send(slot, tag, payload)?;
        self.recv(slot)
    }
}
