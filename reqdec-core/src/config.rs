// CONFIG - Driver configuration
//
// Loaded from a JSON file (path taken from REQDEC_CONFIG when not given explicitly).
// Every field has a default so a partial file is fine.

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `VIDEO_MAX_FRAME`: most buffers a V4L2 queue can hold.
pub const MAX_SLOTS: usize = 32;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "REQDEC_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// V4L2 memory-to-memory decoder node
    pub video_device: PathBuf,
    /// Media controller node used to allocate requests
    pub media_device: PathBuf,
    /// Bitstream (OUTPUT) buffers, one in-flight job each
    pub input_slots: usize,
    /// Decoded picture (CAPTURE) buffers
    pub output_slots: usize,
    /// Size of each bitstream buffer in bytes
    pub bitstream_buffer_size: usize,
    /// Coded size negotiated on the capture queue
    pub coded_width: u32,
    pub coded_height: u32,
    /// Bound for implicit waits (begin-picture, slice buffer creation). None waits forever.
    pub sync_timeout_ms: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            video_device: PathBuf::from("/dev/video0"),
            media_device: PathBuf::from("/dev/media0"),
            input_slots: 2,
            output_slots: 2,
            bitstream_buffer_size: 1024 * 1024,
            coded_width: 1920,
            coded_height: 1088,
            sync_timeout_ms: None,
        }
    }
}

impl DriverConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DriverError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        config.validate()?;
        tracing::debug!("Loaded driver config from {}", path.display());
        Ok(config)
    }

    /// Load from `REQDEC_CONFIG` if set, defaults otherwise.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_slots == 0 || self.output_slots == 0 {
            return Err(DriverError::Config(format!(
                "Slot counts must be at least 1 (input={}, output={})",
                self.input_slots, self.output_slots
            )));
        }
        if self.input_slots > MAX_SLOTS || self.output_slots > MAX_SLOTS {
            return Err(DriverError::Config(format!(
                "Slot counts are limited to {} (input={}, output={})",
                MAX_SLOTS, self.input_slots, self.output_slots
            )));
        }
        if self.bitstream_buffer_size == 0 {
            return Err(DriverError::Config("bitstream_buffer_size must be non-zero".into()));
        }
        if self.coded_width == 0 || self.coded_height == 0 {
            return Err(DriverError::Config(format!(
                "Invalid coded size {}x{}",
                self.coded_width, self.coded_height
            )));
        }
        Ok(())
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }
}
