//! Simulator configuration, loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid configuration:
//!
//! ```json
//! {
//!   "bus_count": 2,
//!   "copy_mode": false,
//!   "frame_len": 4096,
//!   "proposed_max_payload": 512,
//!   "class": { "max_payload_transfer_size": 512, "negotiation": "Stored" }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use usbd_video::ClassConfig;

use crate::SimError;

/// Bus slots in the simulated device
pub const MAX_BUSES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Buses streaming in parallel
    pub bus_count: u8,
    /// Isochronous IN endpoint address
    pub endpoint: u8,
    /// Copy each fragment into a scratch buffer instead of writing headers
    /// into the frame buffer
    pub copy_mode: bool,
    /// Frame data bytes
    pub frame_len: usize,
    /// Frames per bus
    pub frame_count: u32,
    /// Pace frames at the configured frame interval
    pub realtime: bool,
    /// dwMaxPayloadTransferSize the host writes back during probe/commit;
    /// `None` echoes the device's offer
    pub proposed_max_payload: Option<u32>,
    pub class: ClassConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        let class = ClassConfig::default();
        Self {
            bus_count: 1,
            endpoint: 0x81,
            copy_mode: true,
            frame_len: class.max_video_frame_size as usize,
            frame_count: 4,
            realtime: false,
            proposed_max_payload: None,
            class,
        }
    }
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.bus_count == 0 || self.bus_count as usize > MAX_BUSES {
            return Err(SimError::InvalidConfig(format!(
                "bus_count must be 1..={}, got {}",
                MAX_BUSES, self.bus_count
            )));
        }
        if self.endpoint & 0x80 == 0 {
            return Err(SimError::InvalidConfig(format!(
                "endpoint 0x{:02x} is not an IN endpoint",
                self.endpoint
            )));
        }
        if self.frame_len == 0 {
            return Err(SimError::InvalidConfig("frame_len must be non-zero".into()));
        }
        if let Some(size) = self.proposed_max_payload {
            if size <= self.class.header_len as u32 {
                return Err(SimError::InvalidConfig(format!(
                    "proposed max payload {} cannot carry a {}-byte header",
                    size, self.class.header_len
                )));
            }
        }
        if self.frame_len > self.class.max_video_frame_size as usize {
            log::warn!(
                "frame_len {} exceeds advertised max video frame size {}",
                self.frame_len,
                self.class.max_video_frame_size
            );
        }
        Ok(())
    }

    /// Largest payload transfer either side may settle on
    pub fn largest_payload(&self) -> usize {
        let offered = self.class.max_payload_transfer_size;
        self.proposed_max_payload.map_or(offered, |size| size.max(offered)) as usize
    }

    /// Wall-clock time between frames in realtime mode
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(self.class.frame_interval as u64 * 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use usbd_video::NegotiationMode;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(SimConfig::from_json("{}").unwrap(), SimConfig::default());
    }

    #[test]
    fn test_partial_class_override() {
        let config = SimConfig::from_json(
            r#"{
                "bus_count": 2,
                "copy_mode": false,
                "frame_len": 4096,
                "class": { "max_payload_transfer_size": 512, "negotiation": "Stored" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.bus_count, 2);
        assert!(!config.copy_mode);
        assert_eq!(config.class.max_payload_transfer_size, 512);
        assert_eq!(config.class.negotiation, NegotiationMode::Stored);
        // Untouched fields keep their defaults
        assert_eq!(config.class.header_len, 12);
        assert_eq!(config.class.entities.len(), 3);
        assert_eq!(config.frame_interval(), Duration::from_micros(33_333) + Duration::from_nanos(300));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            SimConfig::from_json(r#"{ "bus_count": 0 }"#),
            Err(SimError::InvalidConfig(_))
        ));
        assert!(matches!(
            SimConfig::from_json(r#"{ "endpoint": 1 }"#),
            Err(SimError::InvalidConfig(_))
        ));
        assert!(matches!(SimConfig::from_json(r#"{ "bus_count": "two" }"#), Err(SimError::Json(_))));
        assert!(matches!(
            SimConfig::from_json(r#"{ "proposed_max_payload": 12 }"#),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_largest_payload_covers_the_proposal() {
        let mut config = SimConfig::default();
        assert_eq!(config.largest_payload(), 1023);
        config.proposed_max_payload = Some(256);
        assert_eq!(config.largest_payload(), 1023);
        config.proposed_max_payload = Some(3072);
        assert_eq!(config.largest_payload(), 3072);
    }

    #[test]
    fn test_json_round_trip_keeps_policy() {
        let mut config = SimConfig::default();
        config.class.policy.gain.cur = Some(64);
        let json = config.to_json().unwrap();
        assert_eq!(SimConfig::from_json(&json).unwrap(), config);
    }
}
