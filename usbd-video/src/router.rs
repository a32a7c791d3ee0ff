//! # Class Request Router
//!
//! Dispatches class-specific control requests to canned control values or
//! to the per-bus register bank.
//!
//! ```text
//! wIndex lo (interface)   wIndex hi (entity)   handler
//! ─────────────────────   ──────────────────   ─────────────────────────────
//!          0                      0            power mode / request error code
//!          0                     id            EntityTable ─► camera terminal
//!                                                          └► processing unit
//!          1                      *            probe / commit / stream error
//!       other                     *            UnknownInterface
//! ```
//!
//! A GET fills the caller's buffer and returns the number of bytes written,
//! never more than `wLength`. A SET_CUR receives the host's data stage in the
//! same buffer and returns zero. Any error stalls the control transfer.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controls::{Control, ControlPolicy};
use crate::entity::{EntityKind, EntityTable};
use crate::protocol::{
    ClassRequest, Request, ERROR_INVALID_CONTROL, INFO_GET_ONLY, INFO_GET_SET, PROBE_COMMIT_LEN,
    VC_REQUEST_ERROR_CODE_CONTROL, VC_VIDEO_POWER_MODE_CONTROL, VIDEO_CONTROL_INTERFACE, VIDEO_STREAMING_INTERFACE,
    VS_COMMIT_CONTROL, VS_PROBE_CONTROL, VS_STREAM_ERROR_CODE_CONTROL,
};
use crate::registers::ControlRegisterBank;

/// What SET_CUR on probe/commit does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NegotiationMode {
    /// Host writes are acknowledged and dropped; the device always reports
    /// the record seeded at interface initialisation
    #[default]
    Fixed,
    /// Host writes are stored in the addressed record
    Stored,
}

/// Reasons a control request is stalled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    #[error("unsupported request 0x{request:02x}")]
    UnsupportedRequest { request: u8 },
    /// Camera control addressed to an input terminal that is not a camera
    #[error("input terminal type 0x{terminal_type:04x} has no camera controls")]
    UnknownTerminal { terminal_type: u16 },
    #[error("unknown control selector 0x{selector:02x}")]
    UnknownSelector { selector: u8 },
    #[error("no video function on interface {interface}")]
    UnknownInterface { interface: u8 },
    /// Stored negotiation rejected a record that cannot carry a payload
    #[error("negotiated payload size cannot carry a payload header")]
    InvalidNegotiation,
}

/// Copy as much of `value` as fits into `data`
fn reply(data: &mut [u8], value: &[u8]) -> usize {
    let len = value.len().min(data.len());
    data[..len].copy_from_slice(&value[..len]);
    len
}

/// Borrowed view over one bus's control state
pub struct RequestRouter<'a> {
    registers: &'a mut ControlRegisterBank,
    entities: &'a EntityTable,
    policy: &'a ControlPolicy,
    negotiation: NegotiationMode,
    header_len: u8,
}

impl<'a> RequestRouter<'a> {
    pub fn new(
        registers: &'a mut ControlRegisterBank,
        entities: &'a EntityTable,
        policy: &'a ControlPolicy,
        negotiation: NegotiationMode,
        header_len: u8,
    ) -> Self {
        Self {
            registers,
            entities,
            policy,
            negotiation,
            header_len,
        }
    }

    /// Handle one class request
    ///
    /// Returns the number of bytes written into `data` for a GET, zero for
    /// an accepted SET_CUR.
    pub fn route(&mut self, req: &ClassRequest, data: &mut [u8]) -> Result<usize, RequestError> {
        debug!(
            "class request 0x{:02x} if={} entity=0x{:02x} sel=0x{:02x} len={}",
            req.request,
            req.interface(),
            req.entity_id(),
            req.selector(),
            req.length
        );

        let result = self.dispatch(req, data);
        if let Err(err) = &result {
            warn!(
                "unhandled class request 0x{:02x} if={} entity=0x{:02x} sel=0x{:02x}: {}",
                req.request,
                req.interface(),
                req.entity_id(),
                req.selector(),
                err
            );
        }
        result
    }

    fn dispatch(&mut self, req: &ClassRequest, data: &mut [u8]) -> Result<usize, RequestError> {
        let unsupported = RequestError::UnsupportedRequest { request: req.request };
        let request = Request::try_from(req.request).map_err(|_| unsupported)?;
        if request.is_get() != req.is_device_to_host() {
            return Err(unsupported);
        }

        let limit = (req.length as usize).min(data.len());
        let data = &mut data[..limit];
        let selector = req.selector();

        match (req.interface(), req.entity_id()) {
            (VIDEO_CONTROL_INTERFACE, 0) => self.interface_control(selector, request, data),
            (VIDEO_CONTROL_INTERFACE, entity_id) => self.entity_control(entity_id, selector, request, data),
            (VIDEO_STREAMING_INTERFACE, _) => self.streaming_control(selector, request, data),
            (interface, _) => Err(RequestError::UnknownInterface { interface }),
        }
    }

    /// Requests addressed to the video control interface itself
    fn interface_control(&mut self, selector: u8, request: Request, data: &mut [u8]) -> Result<usize, RequestError> {
        match (selector, request) {
            (VC_VIDEO_POWER_MODE_CONTROL, Request::SetCur) => Ok(0),
            (VC_VIDEO_POWER_MODE_CONTROL, Request::GetCur) => Ok(reply(data, &[self.registers.power_mode])),
            (VC_VIDEO_POWER_MODE_CONTROL, Request::GetInfo) => Ok(reply(data, &[INFO_GET_SET])),
            // Reported verbatim, whatever the last error was
            (VC_REQUEST_ERROR_CODE_CONTROL, Request::GetCur) => Ok(reply(data, &[ERROR_INVALID_CONTROL])),
            (VC_REQUEST_ERROR_CODE_CONTROL, Request::GetInfo) => Ok(reply(data, &[INFO_GET_SET])),
            (VC_VIDEO_POWER_MODE_CONTROL | VC_REQUEST_ERROR_CODE_CONTROL, _) => Err(unsupported(request)),
            _ => Ok(0),
        }
    }

    /// Requests addressed to a terminal or unit
    fn entity_control(
        &mut self,
        entity_id: u8,
        selector: u8,
        request: Request,
        data: &mut [u8],
    ) -> Result<usize, RequestError> {
        let Some(entity) = self.entities.lookup(entity_id) else {
            return Ok(0);
        };

        match entity.kind {
            EntityKind::InputTerminal => {
                if !entity.is_camera() {
                    return Err(RequestError::UnknownTerminal {
                        terminal_type: entity.terminal_type,
                    });
                }
                let control = Control::camera(selector).ok_or(RequestError::UnknownSelector { selector })?;
                self.control(control, request, data)
            }
            EntityKind::ProcessingUnit => {
                let Some(control) = Control::processing(selector) else {
                    self.registers.error_code = ERROR_INVALID_CONTROL;
                    return Err(RequestError::UnknownSelector { selector });
                };
                self.control(control, request, data)
            }
            EntityKind::OutputTerminal
            | EntityKind::SelectorUnit
            | EntityKind::ExtensionUnit
            | EntityKind::EncodingUnit => Ok(0),
        }
    }

    fn control(&self, control: Control, request: Request, data: &mut [u8]) -> Result<usize, RequestError> {
        let value = self
            .policy
            .setting(control)
            .respond(control, request)
            .ok_or(unsupported(request))?;
        Ok(reply(data, &value))
    }

    /// Requests addressed to the video streaming interface
    fn streaming_control(&mut self, selector: u8, request: Request, data: &mut [u8]) -> Result<usize, RequestError> {
        match selector {
            VS_PROBE_CONTROL | VS_COMMIT_CONTROL => self.negotiation_control(selector, request, data),
            VS_STREAM_ERROR_CODE_CONTROL => match request {
                Request::GetCur => Ok(reply(data, &[self.registers.error_code])),
                Request::GetInfo => Ok(reply(data, &[INFO_GET_ONLY])),
                _ => Err(unsupported(request)),
            },
            _ => Ok(0),
        }
    }

    fn negotiation_control(&mut self, selector: u8, request: Request, data: &mut [u8]) -> Result<usize, RequestError> {
        let record = if selector == VS_PROBE_CONTROL {
            &mut self.registers.probe
        } else {
            &mut self.registers.commit
        };

        match request {
            Request::SetCur => {
                if self.negotiation == NegotiationMode::Fixed {
                    debug!("negotiation write on selector 0x{:02x} ignored", selector);
                    return Ok(0);
                }
                let proposal = record.overlay(data);
                if proposal.max_payload_transfer_size as usize <= self.header_len as usize {
                    return Err(RequestError::InvalidNegotiation);
                }
                *record = proposal;
                Ok(0)
            }
            Request::GetLen => Ok(reply(data, &[PROBE_COMMIT_LEN as u8])),
            Request::GetInfo => Ok(reply(data, &[INFO_GET_SET])),
            Request::GetCur | Request::GetMin | Request::GetMax | Request::GetRes | Request::GetDef => {
                Ok(reply(data, &record.to_bytes()))
            }
        }
    }
}

fn unsupported(request: Request) -> RequestError {
    RequestError::UnsupportedRequest { request: request as u8 }
}
