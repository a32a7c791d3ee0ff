//! Per-bus control registers: the probe/commit negotiation records and the
//! power-mode and error-code bytes.

use crate::protocol::ProbeCommit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlRegisterBank {
    pub probe: ProbeCommit,
    pub commit: ProbeCommit,
    pub power_mode: u8,
    /// Last request error code (bRequestErrorCode)
    pub error_code: u8,
}

impl ControlRegisterBank {
    /// Probe and commit start out identical
    pub const fn new(record: ProbeCommit) -> Self {
        Self {
            probe: record,
            commit: record,
            power_mode: 0,
            error_code: 0,
        }
    }

    /// Bus reset clears the power mode and error code; negotiation survives
    pub fn reset(&mut self) {
        self.power_mode = 0;
        self.error_code = 0;
    }

    /// Payload size the host committed to
    pub fn max_payload_transfer_size(&self) -> usize {
        self.commit.max_payload_transfer_size as usize
    }
}
