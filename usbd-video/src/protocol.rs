//! # Video Class Wire Definitions
//!
//! This module defines the byte-level formats exchanged with the host:
//! class-specific setup packets, the probe/commit negotiation record and the
//! payload header that prefixes every video data transfer.
//!
//! ## Setup Packet Addressing
//!
//! ```text
//! ┌───────────────┬──────────┬─────────────────────┬──────────────────────┬──────────┐
//! │ bmRequestType │ bRequest │       wValue        │        wIndex        │ wLength  │
//! │    1 byte     │  1 byte  │ hi: control selector│ hi: entity id        │ 2 bytes  │
//! │               │          │ lo: 0               │ lo: interface number │          │
//! └───────────────┴──────────┴─────────────────────┴──────────────────────┴──────────┘
//! ```
//!
//! ## Payload Header
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────────────────────────────┐
//! │ bHeaderLength│ bmHeaderInfo │  PTS / SCR (unused, always zero)      │
//! │    1 byte    │    1 byte    │  bHeaderLength - 2 bytes              │
//! └──────────────┴──────────────┴───────────────────────────────────────┘
//!
//! bmHeaderInfo: bit7 EOH | bit6 ERR | bit5 STI | bit4 RES | bit3 SCR | bit2 PTS | bit1 EOF | bit0 FID
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interface number of the video control interface
pub const VIDEO_CONTROL_INTERFACE: u8 = 0;

/// Interface number of the video streaming interface
pub const VIDEO_STREAMING_INTERFACE: u8 = 1;

/// Alternate setting that carries isochronous video data
pub const STREAMING_ALT_SETTING: u8 = 1;

/// Video control interface selectors (entity id 0)
pub const VC_VIDEO_POWER_MODE_CONTROL: u8 = 0x01;
pub const VC_REQUEST_ERROR_CODE_CONTROL: u8 = 0x02;

/// Video streaming interface selectors
pub const VS_PROBE_CONTROL: u8 = 0x01;
pub const VS_COMMIT_CONTROL: u8 = 0x02;
pub const VS_STREAM_ERROR_CODE_CONTROL: u8 = 0x06;

/// Request error code "Invalid control"
pub const ERROR_INVALID_CONTROL: u8 = 0x06;

/// GET_INFO bitmap: supports GET and SET
pub const INFO_GET_SET: u8 = 0x03;

/// GET_INFO bitmap: supports GET only
pub const INFO_GET_ONLY: u8 = 0x01;

/// bmRequestType for class-specific interface requests
pub const REQUEST_TYPE_CLASS_IN: u8 = 0xA1;
pub const REQUEST_TYPE_CLASS_OUT: u8 = 0x21;

/// Size of the serialized probe/commit record (UVC 1.1 layout)
pub const PROBE_COMMIT_LEN: usize = 34;

/// Payload header length used unless configured otherwise
pub const DEFAULT_HEADER_LEN: u8 = 12;

/// Smallest header that still carries bHeaderLength and bmHeaderInfo
pub const MIN_HEADER_LEN: u8 = 2;

/// bmHeaderInfo bits
pub const HEADER_FID: u8 = 1 << 0;
pub const HEADER_EOF: u8 = 1 << 1;
pub const HEADER_PTS: u8 = 1 << 2;
pub const HEADER_SCR: u8 = 1 << 3;
pub const HEADER_STI: u8 = 1 << 5;
pub const HEADER_ERR: u8 = 1 << 6;
pub const HEADER_EOH: u8 = 1 << 7;

/// Class-specific request codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Request {
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

impl TryFrom<u8> for Request {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::SetCur),
            0x81 => Ok(Self::GetCur),
            0x82 => Ok(Self::GetMin),
            0x83 => Ok(Self::GetMax),
            0x84 => Ok(Self::GetRes),
            0x85 => Ok(Self::GetLen),
            0x86 => Ok(Self::GetInfo),
            0x87 => Ok(Self::GetDef),
            _ => Err(()),
        }
    }
}

impl Request {
    /// GET requests move data from device to host
    pub const fn is_get(self) -> bool {
        (self as u8) & 0x80 != 0
    }
}

/// A class-specific control request addressed to an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClassRequest {
    /// bmRequestType; bit 7 set for device-to-host
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl ClassRequest {
    /// Decode a raw 8-byte setup packet
    pub fn from_bytes(raw: &[u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    /// Build a device-to-host request
    pub fn get(request: Request, interface: u8, entity_id: u8, selector: u8, length: u16) -> Self {
        Self {
            request_type: REQUEST_TYPE_CLASS_IN,
            request: request as u8,
            value: (selector as u16) << 8,
            index: ((entity_id as u16) << 8) | interface as u16,
            length,
        }
    }

    /// Build a host-to-device SET_CUR request
    pub fn set_cur(interface: u8, entity_id: u8, selector: u8, length: u16) -> Self {
        Self {
            request_type: REQUEST_TYPE_CLASS_OUT,
            request: Request::SetCur as u8,
            value: (selector as u16) << 8,
            index: ((entity_id as u16) << 8) | interface as u16,
            length,
        }
    }

    /// Interface number (wIndex low byte)
    pub fn interface(&self) -> u8 {
        self.index as u8
    }

    /// Entity id (wIndex high byte)
    pub fn entity_id(&self) -> u8 {
        (self.index >> 8) as u8
    }

    /// Control selector (wValue high byte)
    pub fn selector(&self) -> u8 {
        (self.value >> 8) as u8
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// Video probe and commit controls
///
/// Both records share this layout; the host proposes parameters through
/// probe and locks them in through commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProbeCommit {
    /// bmHint
    pub hint: u16,
    pub format_index: u8,
    pub frame_index: u8,
    /// Frame interval in 100 ns units
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: u8,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
}

impl ProbeCommit {
    /// Record advertised after interface initialisation
    pub const fn new(frame_interval: u32, max_video_frame_size: u32, max_payload_transfer_size: u32) -> Self {
        Self {
            hint: 0x0001,
            format_index: 1,
            frame_index: 1,
            frame_interval,
            key_frame_rate: 0,
            p_frame_rate: 0,
            comp_quality: 0,
            comp_window_size: 0,
            delay: 0,
            max_video_frame_size,
            max_payload_transfer_size,
            clock_frequency: 0,
            framing_info: 0,
            preferred_version: 0,
            min_version: 0,
            max_version: 0,
        }
    }

    /// Serialize into the little-endian wire layout
    pub fn to_bytes(&self) -> [u8; PROBE_COMMIT_LEN] {
        let mut out = [0u8; PROBE_COMMIT_LEN];
        out[0..2].copy_from_slice(&self.hint.to_le_bytes());
        out[2] = self.format_index;
        out[3] = self.frame_index;
        out[4..8].copy_from_slice(&self.frame_interval.to_le_bytes());
        out[8..10].copy_from_slice(&self.key_frame_rate.to_le_bytes());
        out[10..12].copy_from_slice(&self.p_frame_rate.to_le_bytes());
        out[12..14].copy_from_slice(&self.comp_quality.to_le_bytes());
        out[14..16].copy_from_slice(&self.comp_window_size.to_le_bytes());
        out[16..18].copy_from_slice(&self.delay.to_le_bytes());
        out[18..22].copy_from_slice(&self.max_video_frame_size.to_le_bytes());
        out[22..26].copy_from_slice(&self.max_payload_transfer_size.to_le_bytes());
        out[26..30].copy_from_slice(&self.clock_frequency.to_le_bytes());
        out[30] = self.framing_info;
        out[31] = self.preferred_version;
        out[32] = self.min_version;
        out[33] = self.max_version;
        out
    }

    /// Parse the wire layout
    pub fn from_bytes(raw: &[u8; PROBE_COMMIT_LEN]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            hint: u16_at(0),
            format_index: raw[2],
            frame_index: raw[3],
            frame_interval: u32_at(4),
            key_frame_rate: u16_at(8),
            p_frame_rate: u16_at(10),
            comp_quality: u16_at(12),
            comp_window_size: u16_at(14),
            delay: u16_at(16),
            max_video_frame_size: u32_at(18),
            max_payload_transfer_size: u32_at(22),
            clock_frequency: u32_at(26),
            framing_info: raw[30],
            preferred_version: raw[31],
            min_version: raw[32],
            max_version: raw[33],
        }
    }

    /// Overlay a (possibly short) host write onto this record
    ///
    /// UVC 1.0 hosts send the first 26 bytes only; the remaining fields keep
    /// their current values.
    pub fn overlay(&self, data: &[u8]) -> Self {
        let mut raw = self.to_bytes();
        let len = data.len().min(PROBE_COMMIT_LEN);
        raw[..len].copy_from_slice(&data[..len]);
        Self::from_bytes(&raw)
    }
}

/// Errors while decoding a payload header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderError {
    /// Fewer bytes than a minimal header
    #[error("transfer too short for a payload header")]
    TooShort,
    /// bHeaderLength is below the minimum or past the end of the transfer
    #[error("invalid header length {0}")]
    BadLength(u8),
    /// bmHeaderInfo without the end-of-header bit
    #[error("end-of-header bit not set")]
    MissingEndOfHeader,
}

/// Payload header prefixed to every video data transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadHeader {
    /// bHeaderLength
    pub length: u8,
    /// Frame identifier (parity) bit
    pub frame_id: bool,
    /// Last payload of the current frame
    pub end_of_frame: bool,
}

impl PayloadHeader {
    /// bmHeaderInfo for this header
    pub const fn info(&self) -> u8 {
        let mut info = HEADER_EOH;
        if self.frame_id {
            info |= HEADER_FID;
        }
        if self.end_of_frame {
            info |= HEADER_EOF;
        }
        info
    }

    /// Write the header over `buf`, zeroing every byte it does not define
    ///
    /// `buf` must be `length` bytes long.
    pub fn write(&self, buf: &mut [u8]) {
        buf.fill(0);
        buf[0] = self.length;
        buf[1] = self.info();
    }

    /// Parse the header at the start of a transfer
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < MIN_HEADER_LEN as usize {
            return Err(HeaderError::TooShort);
        }
        let length = data[0];
        if length < MIN_HEADER_LEN || length as usize > data.len() {
            return Err(HeaderError::BadLength(length));
        }
        let info = data[1];
        if info & HEADER_EOH == 0 {
            return Err(HeaderError::MissingEndOfHeader);
        }
        Ok(Self {
            length,
            frame_id: info & HEADER_FID != 0,
            end_of_frame: info & HEADER_EOF != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_packet_addressing() {
        // GET_CUR, selector 0x04, entity 0x01, interface 0, wLength 4
        let raw = [0xA1, 0x81, 0x00, 0x04, 0x00, 0x01, 0x04, 0x00];
        let req = ClassRequest::from_bytes(&raw);

        assert!(req.is_device_to_host());
        assert_eq!(req.request, Request::GetCur as u8);
        assert_eq!(req.selector(), 0x04);
        assert_eq!(req.entity_id(), 0x01);
        assert_eq!(req.interface(), 0);
        assert_eq!(req.length, 4);
        assert_eq!(req, ClassRequest::get(Request::GetCur, 0, 0x01, 0x04, 4));
    }

    #[test]
    fn test_request_conversion() {
        assert_eq!(Request::try_from(0x85), Ok(Request::GetLen));
        assert!(Request::try_from(0x88).is_err());
        assert!(Request::GetDef.is_get());
        assert!(!Request::SetCur.is_get());
    }

    #[test]
    fn test_probe_commit_layout() {
        let record = ProbeCommit::new(333_333, 614_400, 1023);
        let raw = record.to_bytes();

        assert_eq!(&raw[0..4], &[0x01, 0x00, 0x01, 0x01]);
        assert_eq!(&raw[4..8], &333_333u32.to_le_bytes());
        assert_eq!(&raw[18..22], &614_400u32.to_le_bytes());
        assert_eq!(&raw[22..26], &1023u32.to_le_bytes());
        assert!(raw[26..].iter().all(|b| *b == 0));
        assert_eq!(ProbeCommit::from_bytes(&raw), record);
    }

    #[test]
    fn test_probe_commit_short_overlay() {
        let record = ProbeCommit::new(333_333, 614_400, 1023);
        let mut proposal = record;
        proposal.frame_interval = 666_666;
        proposal.clock_frequency = 48_000_000;

        // A 26-byte write leaves the UVC 1.1 tail untouched
        let updated = record.overlay(&proposal.to_bytes()[..26]);
        assert_eq!(updated.frame_interval, 666_666);
        assert_eq!(updated.clock_frequency, 0);
    }

    #[test]
    fn test_header_bits() {
        let mut buf = [0xFFu8; 12];
        PayloadHeader { length: 12, frame_id: false, end_of_frame: false }.write(&mut buf);
        assert_eq!(buf[0], 12);
        assert_eq!(buf[1], 0x80);
        assert!(buf[2..].iter().all(|b| *b == 0));

        PayloadHeader { length: 12, frame_id: true, end_of_frame: true }.write(&mut buf);
        assert_eq!(buf[1], HEADER_EOH | HEADER_EOF | HEADER_FID);
    }

    #[test]
    fn test_header_parse_rejects_malformed() {
        assert_eq!(PayloadHeader::parse(&[12]), Err(HeaderError::TooShort));
        assert_eq!(PayloadHeader::parse(&[12, 0x80, 0, 0]), Err(HeaderError::BadLength(12)));
        assert_eq!(PayloadHeader::parse(&[2, 0x02]), Err(HeaderError::MissingEndOfHeader));

        let header = PayloadHeader::parse(&[2, 0x83, 0xAA]).unwrap();
        assert!(header.frame_id);
        assert!(header.end_of_frame);
    }
}
