//! # Per-Bus Contexts
//!
//! A device may expose the video function on several USB controllers. Each
//! one gets its own [`BusContext`] inside a fixed-size [`BusRegistry`]; the
//! bus index is the only identity and nothing is shared between entries.
//!
//! ```text
//! BusRegistry<N>
//! ├── [0] BusContext ─┬─ ControlRegisterBank   (probe, commit, power, error)
//! │                   ├─ EntityTable           (terminals and units)
//! │                   ├─ ControlPolicy         (canned control values)
//! │                   └─ VideoStream           (fragmentation session)
//! ├── [1] BusContext
//! └── ...
//! ```

use core::fmt;

use heapless::Vec;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controls::ControlPolicy;
use crate::entity::{EntityDescriptor, EntityError, EntityTable, DEFAULT_ENTITIES, MAX_ENTITIES};
use crate::protocol::{
    ClassRequest, ProbeCommit, DEFAULT_HEADER_LEN, MIN_HEADER_LEN, STREAMING_ALT_SETTING, VIDEO_STREAMING_INTERFACE,
};
use crate::registers::ControlRegisterBank;
use crate::router::{NegotiationMode, RequestError, RequestRouter};
use crate::stream::{FrameSource, StreamError, StreamStatus, VideoStream};
use crate::traits::{StreamHooks, VideoTransport};

/// Index of a USB device controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusId(pub u8);

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus{}", self.0)
    }
}

/// Registry-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("bus {bus} out of range")]
    UnknownBus { bus: u8 },
    /// `init_interface` has not run for this bus
    #[error("bus {bus} has no video interface")]
    Uninitialized { bus: u8 },
    #[error("request stalled: {0}")]
    Request(#[from] RequestError),
    #[error("stream: {0}")]
    Stream(#[from] StreamError),
    #[error("entity table: {0}")]
    Entity(#[from] EntityError),
}

/// Video function configuration applied by `init_interface`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    /// dwFrameInterval, 100 ns units
    pub frame_interval: u32,
    /// dwMaxVideoFrameSize
    pub max_video_frame_size: u32,
    /// dwMaxPayloadTransferSize, payload header included
    pub max_payload_transfer_size: u32,
    /// bHeaderLength of every payload header
    pub header_len: u8,
    pub negotiation: NegotiationMode,
    pub entities: Vec<EntityDescriptor, MAX_ENTITIES>,
    pub policy: ControlPolicy,
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self {
            // 30 fps
            frame_interval: 333_333,
            // 640x480 YUY2
            max_video_frame_size: 640 * 480 * 2,
            max_payload_transfer_size: 1023,
            header_len: DEFAULT_HEADER_LEN,
            negotiation: NegotiationMode::Fixed,
            entities: DEFAULT_ENTITIES.iter().copied().collect(),
            policy: ControlPolicy::default(),
        }
    }
}

impl ClassConfig {
    /// Probe/commit record seeded at interface initialisation
    pub fn probe_commit(&self) -> ProbeCommit {
        ProbeCommit::new(self.frame_interval, self.max_video_frame_size, self.max_payload_transfer_size)
    }

    /// Serialize with postcard, e.g. for storage in flash
    pub fn to_postcard<'a>(&self, buffer: &'a mut [u8]) -> Result<&'a [u8], postcard::Error> {
        postcard::to_slice(self, buffer).map(|bytes| &*bytes)
    }

    pub fn from_postcard(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}

/// Everything the video function keeps for one bus
#[derive(Debug, Clone)]
pub struct BusContext {
    registers: ControlRegisterBank,
    entities: EntityTable,
    policy: ControlPolicy,
    negotiation: NegotiationMode,
    stream: VideoStream,
}

impl BusContext {
    fn new(config: &ClassConfig) -> Result<Self, Error> {
        let header_len = config.header_len;
        if header_len < MIN_HEADER_LEN || config.max_payload_transfer_size <= header_len as u32 {
            return Err(StreamError::PayloadTooSmall {
                max_payload: config.max_payload_transfer_size as usize,
                header_len,
            }
            .into());
        }

        Ok(Self {
            registers: ControlRegisterBank::new(config.probe_commit()),
            entities: EntityTable::from_descriptors(&config.entities)?,
            policy: config.policy.clone(),
            negotiation: config.negotiation,
            stream: VideoStream::new(header_len),
        })
    }

    pub fn registers(&self) -> &ControlRegisterBank {
        &self.registers
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn policy(&self) -> &ControlPolicy {
        &self.policy
    }

    /// Adjust canned control values at runtime
    pub fn policy_mut(&mut self) -> &mut ControlPolicy {
        &mut self.policy
    }

    pub fn stream(&self) -> &VideoStream {
        &self.stream
    }

    /// Router over this bus's control state
    pub fn router(&mut self) -> RequestRouter<'_> {
        RequestRouter::new(
            &mut self.registers,
            &self.entities,
            &self.policy,
            self.negotiation,
            self.stream.header_len(),
        )
    }
}

/// Bus notifications forwarded by the USB device stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    Reset,
    /// SET_INTERFACE selected `alternate_setting` on `interface`
    SetInterface { interface: u8, alternate_setting: u8 },
}

/// Fixed-size arena of bus contexts
#[derive(Debug, Clone)]
pub struct BusRegistry<const N: usize> {
    buses: [Option<BusContext>; N],
}

impl<const N: usize> Default for BusRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BusRegistry<N> {
    pub fn new() -> Self {
        Self {
            buses: core::array::from_fn(|_| None),
        }
    }

    /// Number of bus slots
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Install the video function on `bus`
    ///
    /// Seeds probe and commit from `config`, rebuilds the entity table and
    /// resets the frame identifier. Any live stream session is dropped.
    pub fn init_interface(&mut self, bus: BusId, config: &ClassConfig) -> Result<(), Error> {
        let slot = self.buses.get_mut(bus.0 as usize).ok_or(Error::UnknownBus { bus: bus.0 })?;
        *slot = Some(BusContext::new(config)?);
        info!(
            "{}: video interface ready, interval={} max_payload={} header_len={}",
            bus, config.frame_interval, config.max_payload_transfer_size, config.header_len
        );
        Ok(())
    }

    pub fn bus(&self, bus: BusId) -> Result<&BusContext, Error> {
        self.buses
            .get(bus.0 as usize)
            .ok_or(Error::UnknownBus { bus: bus.0 })?
            .as_ref()
            .ok_or(Error::Uninitialized { bus: bus.0 })
    }

    pub fn bus_mut(&mut self, bus: BusId) -> Result<&mut BusContext, Error> {
        self.buses
            .get_mut(bus.0 as usize)
            .ok_or(Error::UnknownBus { bus: bus.0 })?
            .as_mut()
            .ok_or(Error::Uninitialized { bus: bus.0 })
    }

    /// Route a class request addressed to one of the video interfaces
    pub fn handle_class_request(&mut self, bus: BusId, req: &ClassRequest, data: &mut [u8]) -> Result<usize, Error> {
        Ok(self.bus_mut(bus)?.router().route(req, data)?)
    }

    /// React to a bus reset or an alternate setting change
    pub fn handle_event<H>(&mut self, bus: BusId, event: BusEvent, hooks: &mut H) -> Result<(), Error>
    where
        H: StreamHooks + ?Sized,
    {
        let ctx = self.bus_mut(bus)?;
        match event {
            BusEvent::Reset => {
                debug!("{}: reset", bus);
                ctx.registers.reset();
                ctx.stream.abort();
            }
            BusEvent::SetInterface {
                interface,
                alternate_setting,
            } => {
                debug!("{}: interface {} alt {}", bus, interface, alternate_setting);
                if alternate_setting == STREAMING_ALT_SETTING {
                    hooks.open(bus, interface);
                } else {
                    if interface == VIDEO_STREAMING_INTERFACE {
                        ctx.stream.abort();
                    }
                    hooks.close(bus, interface);
                }
            }
        }
        Ok(())
    }

    /// Start sending a frame on `endpoint`
    pub fn start_stream<T>(
        &mut self,
        bus: BusId,
        endpoint: u8,
        source: FrameSource<'_>,
        transport: &mut T,
    ) -> Result<(), Error>
    where
        T: VideoTransport + ?Sized,
    {
        let ctx = self.bus_mut(bus)?;
        let max_payload = ctx.registers.max_payload_transfer_size();
        ctx.stream.start(max_payload, endpoint, source, transport)?;
        Ok(())
    }

    /// Report one transfer completion on the streaming endpoint
    pub fn advance_stream<T>(&mut self, bus: BusId, source: FrameSource<'_>, transport: &mut T) -> Result<StreamStatus, Error>
    where
        T: VideoTransport + ?Sized,
    {
        Ok(self.bus_mut(bus)?.stream.advance(source, transport)?)
    }

    pub fn abort_stream(&mut self, bus: BusId) -> Result<bool, Error> {
        Ok(self.bus_mut(bus)?.stream.abort())
    }
}
