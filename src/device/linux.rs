use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::{CaCaps, CaDevice, SlotInfo};
use crate::constants::HLCI_MSG_SIZE;

#[repr(C)]
#[derive(Default)]
struct CaCapsRaw {
    slot_num: libc::c_uint,
    slot_type: libc::c_uint,
    descr_num: libc::c_uint,
    descr_type: libc::c_uint,
}

#[repr(C)]
#[derive(Default)]
struct CaSlotInfoRaw {
    num: libc::c_int,
    slot_type: libc::c_int,
    flags: libc::c_uint,
}

#[repr(C)]
struct CaMsgRaw {
    index: libc::c_uint,
    msg_type: libc::c_uint,
    length: libc::c_uint,
    msg: [u8; HLCI_MSG_SIZE],
}

impl Default for CaMsgRaw {
    fn default() -> Self {
        Self { index: 0, msg_type: 0, length: 0, msg: [0; HLCI_MSG_SIZE] }
    }
}

const fn ioc(dir: u64, nr: u64, size: usize) -> u64 {
    (dir << 30) | ((size as u64) << 16) | ((b'o' as u64) << 8) | nr
}

const IOC_NONE: u64 = 0;
const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

const CA_RESET: u64 = ioc(IOC_NONE, 128, 0);
const CA_GET_CAP: u64 = ioc(IOC_READ, 129, mem::size_of::<CaCapsRaw>());
const CA_GET_SLOT_INFO: u64 = ioc(IOC_READ, 130, mem::size_of::<CaSlotInfoRaw>());
const CA_GET_MSG: u64 = ioc(IOC_READ, 132, mem::size_of::<CaMsgRaw>());
const CA_SEND_MSG: u64 = ioc(IOC_WRITE, 133, mem::size_of::<CaMsgRaw>());

/// `/dev/dvb/adapterN/caM`
pub struct LinuxCaDevice {
    file: File,
}

impl LinuxCaDevice {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        debug!(path = %path.display(), "opened CA device");
        Ok(Self { file })
    }

    fn ioctl<T>(&self, request: u64, arg: *mut T) -> io::Result<()> {
        // SAFETY: `arg` points to a live, correctly sized repr(C) value
        // matching `request`.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl CaDevice for LinuxCaDevice {
    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.file.write(frame)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd { fd: self.file.as_raw_fd(), events: libc::POLLIN, revents: 0 };
        let ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: one valid pollfd
        let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret > 0 && pfd.revents & libc::POLLIN != 0)
    }

    fn reset_slot(&mut self, slot: u8) -> io::Result<()> {
        // CA_RESET takes the slot mask by value
        let mask = 1u32
            .checked_shl(slot as u32)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "slot outside the reset mask"))?;
        // SAFETY: no memory is passed
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), CA_RESET as _, mask as libc::c_int) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn caps(&mut self) -> io::Result<CaCaps> {
        let mut raw = CaCapsRaw::default();
        self.ioctl(CA_GET_CAP, &mut raw)?;
        Ok(CaCaps { slot_num: raw.slot_num, slot_type: raw.slot_type })
    }

    fn slot_info(&mut self, slot: u8) -> io::Result<SlotInfo> {
        let mut raw = CaSlotInfoRaw { num: slot as libc::c_int, ..Default::default() };
        self.ioctl(CA_GET_SLOT_INFO, &mut raw)?;
        Ok(SlotInfo { slot_type: raw.slot_type as u32, flags: raw.flags })
    }

    fn send_msg(&mut self, msg: &[u8]) -> io::Result<()> {
        if msg.len() > HLCI_MSG_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "ca_msg payload too large"));
        }
        let mut raw = CaMsgRaw { length: msg.len() as libc::c_uint, ..Default::default() };
        raw.msg[..msg.len()].copy_from_slice(msg);
        self.ioctl(CA_SEND_MSG, &mut raw)
    }

    fn recv_msg(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut raw = CaMsgRaw { length: HLCI_MSG_SIZE as libc::c_uint, ..Default::default() };
        self.ioctl(CA_GET_MSG, &mut raw)?;
        let n = (raw.length as usize).min(HLCI_MSG_SIZE).min(buf.len());
        buf[..n].copy_from_slice(&raw.msg[..n]);
        Ok(n)
    }
}
