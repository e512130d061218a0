//! Hardware boundary: the CI device the stack talks through.

use std::io;
use std::time::Duration;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::LinuxCaDevice;

/// Result of a capability query (`CA_GET_CAP`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaCaps {
    pub slot_num: u32,
    pub slot_type: u32,
}

/// Result of a slot query (`CA_GET_SLOT_INFO`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot_type: u32,
    pub flags: u32,
}

impl SlotInfo {
    pub fn module_ready(&self) -> bool {
        self.flags & crate::constants::CA_CI_MODULE_READY != 0
    }
}

/// A byte-stream CI device with an out-of-band control channel.
///
/// `read`/`write` carry link-layer TPDUs; `send_msg`/`recv_msg` carry whole
/// APDUs on high-level interfaces. Only one of the two paths is used per
/// device.
pub trait CaDevice: Send {
    fn write(&mut self, frame: &[u8]) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Waits until a read would not block. `Ok(false)` on timeout.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    fn reset_slot(&mut self, slot: u8) -> io::Result<()>;

    fn caps(&mut self) -> io::Result<CaCaps>;

    fn slot_info(&mut self, slot: u8) -> io::Result<SlotInfo>;

    fn send_msg(&mut self, msg: &[u8]) -> io::Result<()>;

    fn recv_msg(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
