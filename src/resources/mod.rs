//! Application-layer resources bound to sessions.

pub mod application_info;
pub mod conditional_access;
pub mod date_time;
pub mod mmi;
pub mod resource_manager;

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::error::CamError;
use crate::interface::ApduSink;
use crate::session::SessionId;
use crate::types::SlotState;

use self::conditional_access::{ConditionalAccess, ProgramTable};
use self::date_time::DateTime;
use self::mmi::Mmi;

/// 32-bit resource identifier as carried in session-open messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceId(pub u32);

impl ResourceId {
    pub const RESOURCE_MANAGER: Self = Self(0x0001_0041);
    pub const APPLICATION_INFORMATION: Self = Self(0x0002_0041);
    pub const CONDITIONAL_ACCESS: Self = Self(0x0003_0041);
    pub const HOST_CONTROL: Self = Self(0x0020_0041);
    pub const DATE_TIME: Self = Self(0x0024_0041);
    pub const MMI: Self = Self(0x0040_0041);

    /// Everything advertised in our PROFILE reply.
    pub const SUPPORTED: [Self; 5] = [
        Self::RESOURCE_MANAGER,
        Self::APPLICATION_INFORMATION,
        Self::CONDITIONAL_ACCESS,
        Self::DATE_TIME,
        Self::MMI,
    ];

    pub fn from_be_bytes(b: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(b))
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Everything a handler may touch while it runs.
pub struct Ctx<'a> {
    pub sink: &'a mut dyn ApduSink,
    pub slot_state: &'a mut SlotState,
    pub programs: &'a ProgramTable,
    pub slot: u8,
    pub session: SessionId,
}

impl Ctx<'_> {
    pub fn send(&mut self, tag: u32, data: &[u8]) -> Result<(), CamError> {
        self.sink.send_apdu(self.slot, self.session, tag, data)
    }

    /// Asks the module to close this session.
    pub fn request_close(&mut self) -> Result<(), CamError> {
        self.sink.request_close(self.slot, self.session)
    }
}

/// The resource a session is bound to, with its private state.
#[derive(Debug)]
pub enum Resource {
    ResourceManager,
    ApplicationInfo,
    ConditionalAccess(ConditionalAccess),
    DateTime(DateTime),
    Mmi(Mmi),
}

impl Resource {
    /// `None` for host control and anything we do not implement.
    pub fn for_id(id: ResourceId) -> Option<Self> {
        Some(match id {
            ResourceId::RESOURCE_MANAGER => Self::ResourceManager,
            ResourceId::APPLICATION_INFORMATION => Self::ApplicationInfo,
            ResourceId::CONDITIONAL_ACCESS => Self::ConditionalAccess(ConditionalAccess::default()),
            ResourceId::DATE_TIME => Self::DateTime(DateTime::default()),
            ResourceId::MMI => Self::Mmi(Mmi::default()),
            _ => return None,
        })
    }

    pub fn id(&self) -> ResourceId {
        match self {
            Self::ResourceManager => ResourceId::RESOURCE_MANAGER,
            Self::ApplicationInfo => ResourceId::APPLICATION_INFORMATION,
            Self::ConditionalAccess(_) => ResourceId::CONDITIONAL_ACCESS,
            Self::DateTime(_) => ResourceId::DATE_TIME,
            Self::Mmi(_) => ResourceId::MMI,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ResourceManager => "ResourceManager",
            Self::ApplicationInfo => "ApplicationInformation",
            Self::ConditionalAccess(_) => "ConditionalAccess",
            Self::DateTime(_) => "DateTime",
            Self::Mmi(_) => "MMI",
        }
    }

    /// Runs once the open handshake is complete.
    pub fn open(&mut self, ctx: &mut Ctx<'_>) -> Result<(), CamError> {
        match self {
            Self::ResourceManager => resource_manager::open(ctx),
            Self::ApplicationInfo => application_info::open(ctx),
            Self::ConditionalAccess(ca) => ca.open(ctx),
            Self::DateTime(dt) => dt.open(ctx),
            Self::Mmi(mmi) => mmi.open(ctx),
        }
    }

    pub fn handle(&mut self, ctx: &mut Ctx<'_>, apdu: &[u8]) -> Result<(), CamError> {
        match self {
            Self::ResourceManager => resource_manager::handle(ctx, apdu),
            Self::ApplicationInfo => application_info::handle(ctx, apdu),
            Self::ConditionalAccess(ca) => ca.handle(ctx, apdu),
            Self::DateTime(dt) => dt.handle(ctx, apdu),
            Self::Mmi(mmi) => mmi.handle(ctx, apdu),
        }
    }

    pub fn manage(&mut self, ctx: &mut Ctx<'_>, now: Instant) -> Result<(), CamError> {
        match self {
            Self::DateTime(dt) => dt.manage(ctx, now),
            _ => Ok(()),
        }
    }

    pub fn close(&mut self, slot_state: &mut SlotState) {
        match self {
            Self::Mmi(mmi) => mmi.close(slot_state),
            Self::ApplicationInfo => slot_state.app_info = None,
            _ => {}
        }
    }
}
