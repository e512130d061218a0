//! The two physical CI flavours behind one trait.
//!
//! Link-layer devices carry TPDUs and need polling; high-level devices take
//! whole APDUs through a message ioctl and are never polled.

pub mod high_level;
pub mod link;

pub use high_level::HighLevel;
pub use link::LinkLayer;

use crate::cam::CamState;
use crate::error::CamError;
use crate::resources::ResourceId;
use crate::session::SessionId;
use crate::types::InterfaceKind;

/// Where resources send their APDUs.
pub trait ApduSink {
    fn send_apdu(&mut self, slot: u8, session: SessionId, tag: u32, data: &[u8]) -> Result<(), CamError>;

    /// Sends a close-session request for `session`.
    fn request_close(&mut self, slot: u8, session: SessionId) -> Result<(), CamError>;
}

pub trait CamInterface: Send {
    fn kind(&self) -> InterfaceKind;

    fn sink(&mut self) -> &mut dyn ApduSink;

    /// One poll tick. Never fails; problems are logged per slot.
    fn poll(&mut self, state: &mut CamState);

    fn request_session(
        &mut self,
        state: &mut CamState,
        slot: u8,
        resource: ResourceId,
    ) -> Result<SessionId, CamError>;

    /// Closes every session and forgets the selected programs.
    fn shutdown(&mut self, state: &mut CamState);
}
