//! Status snapshots of an opened CAM

use crate::cam::CamState;
use crate::types::{CamStatus, InterfaceKind, ProgramStatus, SessionStatus, SlotStatus};

/// Report generator for CAM status
pub struct Reporter;

impl Reporter {
    /// Generate a structured CamStatus for API consumers
    pub fn create_status(interface: InterfaceKind, state: &CamState) -> CamStatus {
        let slots = state
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| SlotStatus {
                slot:            i as u8,
                active:          s.active,
                mmi_expected:    s.mmi_expected,
                mmi_undisplayed: s.mmi_undisplayed,
                cam:             s.app_info.clone(),
            })
            .collect();

        let sessions = state
            .sessions
            .iter()
            .map(|(id, s)| SessionStatus {
                id:          id.get(),
                slot:        s.slot,
                resource:    s.resource.name(),
                resource_id: s.resource.id().0,
                open:        s.open,
            })
            .collect();

        let programs = state
            .programs
            .iter()
            .map(|p| ProgramStatus {
                program_number: p.program_number,
                version:        p.version,
                scrambled:      p.needs_descrambling(),
                streams:        p.streams.len(),
            })
            .collect();

        CamStatus {
            timestamp: chrono::Utc::now().to_rfc3339(),
            interface,
            slots,
            sessions,
            programs,
        }
    }

    /// Generate pretty-printed JSON string for CLI output
    pub fn generate_json_report(status: &CamStatus) -> String {
        serde_json::to_string_pretty(status)
            .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }
}
