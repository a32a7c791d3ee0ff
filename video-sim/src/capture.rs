//! # Host-Side Frame Capture
//!
//! Checks every payload transfer the way a host driver would and stitches
//! fragments back into frames.
//!
//! ```text
//! transfer ──► size ≤ max payload ──► header valid ──► FID rules ──► append
//!                                                                      │
//!                                                        EOF ──► frame complete
//! ```
//!
//! FID rules: the bit is constant within a frame and differs from the
//! previous completed frame.

use log::trace;
use usbd_video::{BusId, PayloadHeader};

use crate::SimError;

/// Reassembles the frames of one bus
#[derive(Debug)]
pub struct FrameAssembler {
    bus: BusId,
    max_payload: usize,
    header_len: u8,
    current: Vec<u8>,
    /// FID of the frame being assembled
    current_id: Option<bool>,
    /// FID of the last completed frame
    last_id: Option<bool>,
    frames: Vec<Vec<u8>>,
    transfers: u64,
    bytes: u64,
    max_transfer: usize,
}

impl FrameAssembler {
    pub fn new(bus: BusId, max_payload: usize, header_len: u8) -> Self {
        Self {
            bus,
            max_payload,
            header_len,
            current: Vec::new(),
            current_id: None,
            last_id: None,
            frames: Vec::new(),
            transfers: 0,
            bytes: 0,
            max_transfer: 0,
        }
    }

    fn violation(&self, reason: impl Into<String>) -> SimError {
        SimError::HeaderViolation {
            bus: self.bus.0,
            reason: reason.into(),
        }
    }

    /// Consume one transfer
    ///
    /// Returns the index of the frame it completed, if any.
    pub fn push(&mut self, transfer: &[u8]) -> Result<Option<usize>, SimError> {
        if transfer.len() > self.max_payload {
            return Err(self.violation(format!(
                "transfer of {} bytes exceeds max payload {}",
                transfer.len(),
                self.max_payload
            )));
        }

        let header = PayloadHeader::parse(transfer).map_err(|err| self.violation(err.to_string()))?;
        let hl = header.length as usize;
        if header.length != self.header_len {
            return Err(self.violation(format!("header length {} != {}", header.length, self.header_len)));
        }
        if transfer[2..hl].iter().any(|b| *b != 0) {
            return Err(self.violation("reserved header bytes not zero"));
        }
        let data = &transfer[hl..];
        if data.is_empty() {
            return Err(self.violation("payload without data"));
        }

        match self.current_id {
            Some(id) if id != header.frame_id => return Err(self.violation("FID changed inside a frame")),
            None if self.last_id == Some(header.frame_id) => {
                return Err(self.violation("FID did not toggle between frames"))
            }
            _ => {}
        }

        self.transfers += 1;
        self.bytes += transfer.len() as u64;
        self.max_transfer = self.max_transfer.max(transfer.len());
        self.current_id = Some(header.frame_id);
        self.current.extend_from_slice(data);

        trace!(
            "{}: fragment {} bytes eof={} fid={}",
            self.bus,
            data.len(),
            header.end_of_frame,
            header.frame_id
        );

        if !header.end_of_frame {
            return Ok(None);
        }
        self.last_id = self.current_id.take();
        self.frames.push(std::mem::take(&mut self.current));
        Ok(Some(self.frames.len() - 1))
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    /// Bytes of an unfinished frame
    pub fn pending(&self) -> usize {
        self.current.len()
    }

    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Bytes on the wire, headers included
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn max_transfer(&self) -> usize {
        self.max_transfer
    }
}
