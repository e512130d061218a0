use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_TPDU_SIZE, MAX_CONTROL_SPDU, TPDU_HEADER_OVERHEAD};

/// Tunables of the CAM stack. Every field has a default, so a config file
/// only needs the keys it wants to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CamConfig {
    /// Bound on one TPDU read
    pub read_timeout_ms: u64,
    /// Minimum spacing of link-layer poll ticks
    pub poll_interval_ms: u64,
    pub create_tc_retries: u32,
    pub max_sessions: usize,
    pub max_slots: usize,
    pub max_programs: usize,
    pub max_tpdu_size: usize,
    /// Hex dump of every TPDU at trace level
    pub dump_tpdu: bool,
}

impl Default for CamConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 3500,
            poll_interval_ms: 100,
            create_tc_retries: 20,
            max_sessions: 32,
            max_slots: 16,
            max_programs: 24,
            max_tpdu_size: DEFAULT_MAX_TPDU_SIZE,
            dump_tpdu: false,
        }
    }
}

impl CamConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_tpdu_size < TPDU_HEADER_OVERHEAD + MAX_CONTROL_SPDU {
            anyhow::bail!("max_tpdu_size {} too small", self.max_tpdu_size);
        }
        if self.max_sessions == 0 || self.max_sessions > u16::MAX as usize {
            anyhow::bail!("max_sessions must be in 1..=65535");
        }
        // CA_RESET takes a 32-bit slot mask
        if self.max_slots == 0 || self.max_slots > 32 {
            anyhow::bail!("max_slots must be in 1..=32");
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
