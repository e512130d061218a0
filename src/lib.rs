// src/lib.rs
//! EN 50221 Common Interface stack for Conditional Access Modules.

pub mod apdu;
pub mod cam;
pub mod codec;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod interface;
pub mod psi;
pub mod report;
pub mod resources;
pub mod session;
pub mod text;
pub mod transport;
pub mod types;

pub use cam::{Cam, CamState};
pub use config::CamConfig;
pub use device::{CaCaps, CaDevice, SlotInfo};
pub use error::{CamError, ParseError};
pub use psi::{parse_pmt, parse_pmt_section, Pmt};
pub use resources::mmi::{MmiMenu, MmiObject};
pub use resources::ResourceId;
pub use session::SessionId;
pub use types::{CamStatus, InterfaceKind};
