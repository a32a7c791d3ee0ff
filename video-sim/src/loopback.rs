//! # Loopback Transport
//!
//! Stands in for the USB controller. Submitted transfers are copied onto a
//! channel; a host task consumes them and reports each completion back on a
//! second channel, out-of-band from the submission.
//!
//! ```text
//!  device task                              host task
//! ┌──────────────────────┐  Transfer   ┌──────────────────────┐
//! │ LoopbackTransport    │────────────►│ FrameAssembler[bus]  │
//! │   ::start_write      │             │                      │
//! │                      │  BusId      │                      │
//! │ advance_stream ◄─────│◄────────────│ completion           │
//! └──────────────────────┘             └──────────────────────┘
//! ```

use log::{debug, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use usbd_video::{BusId, VideoTransport};

use crate::capture::FrameAssembler;
use crate::SimError;

/// One submitted IN transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub bus: BusId,
    pub endpoint: u8,
    pub data: Vec<u8>,
}

/// Device-side endpoint of one simulated bus
#[derive(Debug)]
pub struct LoopbackTransport {
    bus: BusId,
    configured: bool,
    tx: UnboundedSender<Transfer>,
    submitted: u64,
}

impl LoopbackTransport {
    pub fn new(bus: BusId, tx: UnboundedSender<Transfer>) -> Self {
        Self {
            bus,
            configured: true,
            tx,
            submitted: 0,
        }
    }

    /// Simulate SET_CONFIGURATION / deconfiguration
    pub fn set_configured(&mut self, configured: bool) {
        self.configured = configured;
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl VideoTransport for LoopbackTransport {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn start_write(&mut self, endpoint: u8, data: &[u8]) {
        self.submitted += 1;
        let transfer = Transfer {
            bus: self.bus,
            endpoint,
            data: data.to_vec(),
        };
        if self.tx.send(transfer).is_err() {
            warn!("{}: host gone, transfer on ep 0x{:02x} dropped", self.bus, endpoint);
        }
    }
}

/// Host side of the loopback
///
/// Runs until every transport is dropped, then hands back the assemblers.
/// A header violation ends the task early, which closes the completion
/// channel under the device.
pub async fn run_host(
    mut transfers: UnboundedReceiver<Transfer>,
    completions: UnboundedSender<BusId>,
    mut assemblers: Vec<FrameAssembler>,
) -> Result<Vec<FrameAssembler>, SimError> {
    while let Some(transfer) = transfers.recv().await {
        let assembler = assemblers
            .get_mut(transfer.bus.0 as usize)
            .ok_or(SimError::Device(usbd_video::Error::UnknownBus { bus: transfer.bus.0 }))?;

        if let Some(frame) = assembler.push(&transfer.data)? {
            debug!("{}: frame {} captured", transfer.bus, frame);
        }

        completions.send(transfer.bus).map_err(|_| SimError::ChannelClosed)?;
    }
    Ok(assemblers)
}
