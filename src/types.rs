use serde::Serialize;

use crate::resources::application_info::AppInfo;

/// Per-slot activity flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotState {
    /// Transport connection established
    pub active: bool,
    /// Host sent an MMI request and waits for the CAM
    pub mmi_expected: bool,
    /// A new MMI object arrived and was not shown yet
    pub mmi_undisplayed: bool,
    /// Identification reported by the Application Information resource
    pub app_info: Option<AppInfo>,
}

impl SlotState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Physical interface family, chosen once at open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    LinkLayer,
    HighLevel,
}

/// Open session (public API)
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: u16,
    pub slot: u8,
    pub resource: &'static str,
    pub resource_id: u32,
    pub open: bool,
}

/// Slot information (public API)
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: u8,
    pub active: bool,
    pub mmi_expected: bool,
    pub mmi_undisplayed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cam: Option<AppInfo>,
}

/// Selected program (public API)
#[derive(Debug, Clone, Serialize)]
pub struct ProgramStatus {
    pub program_number: u16,
    pub version: u8,
    pub scrambled: bool,
    pub streams: usize,
}

/// Snapshot of the whole device
#[derive(Debug, Clone, Serialize)]
pub struct CamStatus {
    pub timestamp: String,
    pub interface: InterfaceKind,
    pub slots: Vec<SlotStatus>,
    pub sessions: Vec<SessionStatus>,
    pub programs: Vec<ProgramStatus>,
}
