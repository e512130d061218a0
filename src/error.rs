use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure while walking a borrowed byte slice
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated data: needed {needed} bytes, {available} left")]
    Truncated { needed: usize, available: usize },

    #[error("length field uses {0} bytes (max 4)")]
    LengthTooWide(usize),

    #[error("unexpected tag {0:#08x}")]
    UnexpectedTag(u32),

    #[error("malformed {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Error)]
pub enum CamError {
    #[error("CAM device I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no data from CAM device within {0:?}")]
    Timeout(Duration),

    #[error("short frame from CAM device ({0} bytes)")]
    ShortFrame(usize),

    #[error("invalid read from CAM device (tcid {got} instead of {expected})")]
    UnexpectedTcid { expected: u8, got: u8 },

    #[error("unexpected tag {got:#04x} (expected {expected:#04x})")]
    UnexpectedTag { expected: u8, got: u8 },

    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),

    #[error("session table full ({0} sessions)")]
    SessionTableFull(usize),

    #[error("no session {0}")]
    UnknownSession(u16),

    #[error("unknown resource id {0:#010x}")]
    UnknownResource(u32),

    #[error("{0} not supported")]
    Unsupported(&'static str),

    #[error("message of {len} bytes exceeds interface limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    #[error("could not create transport connection on slot {0}")]
    CreateTc(u8),

    #[error("no MMI session on slot {0}")]
    NoMmiSession(u8),

    #[error("no application information session on slot {0}")]
    NoApplicationInfo(u8),

    #[error("MMI menu already opened on slot {0}")]
    MmiAlreadyOpen(u8),

    #[error("slot {0} out of range")]
    InvalidSlot(u8),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read CA capabilities: {0}")]
    Caps(io::Error),

    #[error("no CI slot reported by the device")]
    NoSlots,

    #[error("no CAM module inserted")]
    NoModule,

    #[error("unsupported CI interface type {0:#x}")]
    UnsupportedInterface(u32),
}
