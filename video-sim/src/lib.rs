//! # UVC Loopback Simulator
//!
//! Runs the `usbd-video` class core against a simulated host:
//!
//! - **Enumeration**: bus reset, probe/commit negotiation through the
//!   request router, streaming alternate setting selection
//! - **Streaming**: frames are fragmented by the engine, carried over a
//!   channel to a host task and completed out-of-band
//! - **Verification**: every payload header is checked and every frame
//!   reassembled and compared with what was sent
//!
//! ## Task Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        run(config)                           │
//! │                                                              │
//! │  ┌────────────────┐   transfers   ┌───────────────────────┐  │
//! │  │   SimDevice    │──────────────►│  run_host (spawned)   │  │
//! │  │ BusRegistry<4> │◄──────────────│  FrameAssembler / bus │  │
//! │  └────────────────┘  completions  └───────────────────────┘  │
//! │           │                                  │               │
//! │           └──────────► SimStats ◄────────────┘               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Once;

use log::{debug, info, warn, LevelFilter};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use usbd_video::protocol::{
    PROBE_COMMIT_LEN, STREAMING_ALT_SETTING, VIDEO_STREAMING_INTERFACE, VS_COMMIT_CONTROL, VS_PROBE_CONTROL,
};
use usbd_video::{
    BusEvent, BusId, BusRegistry, ClassRequest, FrameSource, ProbeCommit, Request, StreamHooks, StreamStatus,
};

pub mod capture;
pub mod config;
pub mod loopback;

pub use capture::FrameAssembler;
pub use config::{SimConfig, MAX_BUSES};
pub use loopback::{LoopbackTransport, Transfer};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Errors raised while simulating
#[derive(Error, Debug)]
pub enum SimError {
    #[error("device error: {0}")]
    Device(#[from] usbd_video::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("loopback channel closed")]
    ChannelClosed,
    #[error("bus {bus}: payload header violation: {reason}")]
    HeaderViolation { bus: u8, reason: String },
    #[error("bus {bus}: probe/commit record is {len} bytes")]
    ShortRecord { bus: u8, len: usize },
    #[error("bus {bus}: captured frame {frame} differs from the frame sent")]
    FrameMismatch { bus: u8, frame: usize },
    #[error("host task failed: {0}")]
    Host(#[from] tokio::task::JoinError),
}

/// Install `env_logger` once; `RUST_LOG` overrides `level`
pub fn init_logging(level: LevelFilter) {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .is_test(cfg!(test))
            .try_init();
    });
}

/// Tracks which buses have the streaming alternate setting selected
#[derive(Debug, Default)]
pub struct SimHooks {
    streaming: [bool; MAX_BUSES],
}

impl SimHooks {
    pub fn is_streaming(&self, bus: BusId) -> bool {
        self.streaming.get(bus.0 as usize).copied().unwrap_or(false)
    }

    fn set(&mut self, bus: BusId, interface: u8, streaming: bool) {
        if interface != VIDEO_STREAMING_INTERFACE {
            return;
        }
        if let Some(slot) = self.streaming.get_mut(bus.0 as usize) {
            *slot = streaming;
        }
    }
}

impl StreamHooks for SimHooks {
    fn open(&mut self, bus: BusId, interface: u8) {
        info!("{}: streaming opened on interface {}", bus, interface);
        self.set(bus, interface, true);
    }

    fn close(&mut self, bus: BusId, interface: u8) {
        info!("{}: streaming closed on interface {}", bus, interface);
        self.set(bus, interface, false);
    }
}

/// Deterministic frame content
pub fn test_pattern(bus: BusId, frame: u32, len: usize) -> Vec<u8> {
    let seed = frame.wrapping_mul(7).wrapping_add(bus.0 as u32);
    (0..len).map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed) as u8).collect()
}

/// Per-bus buffers lent to the engine
struct FrameSlot {
    /// Zero-copy mode: header region followed by frame data
    frame: Vec<u8>,
    scratch: Vec<u8>,
}

impl FrameSlot {
    fn source(&mut self, copy_mode: bool) -> FrameSource<'_> {
        if copy_mode {
            FrameSource::Copy {
                scratch: &mut self.scratch,
                frame: &self.frame,
            }
        } else {
            FrameSource::ZeroCopy { frame: &mut self.frame }
        }
    }
}

/// Simulated device: the bus registry plus one loopback transport per bus
pub struct SimDevice {
    registry: BusRegistry<MAX_BUSES>,
    transports: Vec<LoopbackTransport>,
    hooks: SimHooks,
    config: SimConfig,
}

impl SimDevice {
    pub fn new(config: &SimConfig, tx: UnboundedSender<Transfer>) -> Result<Self, SimError> {
        config.validate()?;

        let mut registry = BusRegistry::new();
        let mut transports = Vec::with_capacity(config.bus_count as usize);
        for index in 0..config.bus_count {
            let bus = BusId(index);
            registry.init_interface(bus, &config.class)?;
            transports.push(LoopbackTransport::new(bus, tx.clone()));
        }

        Ok(Self {
            registry,
            transports,
            hooks: SimHooks::default(),
            config: config.clone(),
        })
    }

    pub fn buses(&self) -> impl Iterator<Item = BusId> {
        (0..self.config.bus_count).map(BusId)
    }

    pub fn registry(&self) -> &BusRegistry<MAX_BUSES> {
        &self.registry
    }

    pub fn hooks(&self) -> &SimHooks {
        &self.hooks
    }

    /// Probe/commit sequence as a host driver performs it
    ///
    /// Returns the committed record.
    pub fn negotiate(&mut self, bus: BusId) -> Result<ProbeCommit, SimError> {
        let offered = self.read_record(bus, VS_PROBE_CONTROL)?;
        debug!("{}: offered {:?}", bus, offered);

        let mut proposal = offered;
        if let Some(size) = self.config.proposed_max_payload {
            proposal.max_payload_transfer_size = size;
        }
        let mut proposal = proposal.to_bytes();
        let set_probe = ClassRequest::set_cur(VIDEO_STREAMING_INTERFACE, 0, VS_PROBE_CONTROL, PROBE_COMMIT_LEN as u16);
        self.registry.handle_class_request(bus, &set_probe, &mut proposal)?;

        let mut agreed = self.read_record(bus, VS_PROBE_CONTROL)?.to_bytes();
        let set_commit = ClassRequest::set_cur(VIDEO_STREAMING_INTERFACE, 0, VS_COMMIT_CONTROL, PROBE_COMMIT_LEN as u16);
        self.registry.handle_class_request(bus, &set_commit, &mut agreed)?;

        let committed = self.read_record(bus, VS_COMMIT_CONTROL)?;
        info!(
            "{}: committed interval={} max_frame={} max_payload={}",
            bus, committed.frame_interval, committed.max_video_frame_size, committed.max_payload_transfer_size
        );
        Ok(committed)
    }

    fn read_record(&mut self, bus: BusId, selector: u8) -> Result<ProbeCommit, SimError> {
        let mut raw = [0u8; PROBE_COMMIT_LEN];
        let req = ClassRequest::get(Request::GetCur, VIDEO_STREAMING_INTERFACE, 0, selector, PROBE_COMMIT_LEN as u16);
        let len = self.registry.handle_class_request(bus, &req, &mut raw)?;
        if len != PROBE_COMMIT_LEN {
            return Err(SimError::ShortRecord { bus: bus.0, len });
        }
        Ok(ProbeCommit::from_bytes(&raw))
    }

    /// Reset, negotiate and open the streaming interface on every bus
    pub fn enumerate(&mut self) -> Result<Vec<ProbeCommit>, SimError> {
        let mut committed = Vec::new();
        for bus in self.buses() {
            self.registry.handle_event(bus, BusEvent::Reset, &mut self.hooks)?;
            committed.push(self.negotiate(bus)?);
            let select = BusEvent::SetInterface {
                interface: VIDEO_STREAMING_INTERFACE,
                alternate_setting: STREAMING_ALT_SETTING,
            };
            self.registry.handle_event(bus, select, &mut self.hooks)?;
        }
        Ok(committed)
    }

    /// Return every bus to the idle alternate setting
    pub fn shutdown(&mut self) -> Result<(), SimError> {
        for bus in self.buses() {
            let idle = BusEvent::SetInterface {
                interface: VIDEO_STREAMING_INTERFACE,
                alternate_setting: 0,
            };
            self.registry.handle_event(bus, idle, &mut self.hooks)?;
        }
        Ok(())
    }

    /// Stream `frame_count` frames on every open bus
    ///
    /// Returns the frames sent, per bus.
    pub async fn stream_frames(
        &mut self,
        completions: &mut UnboundedReceiver<BusId>,
    ) -> Result<Vec<Vec<Vec<u8>>>, SimError> {
        let header_len = self.config.class.header_len as usize;
        let copy_mode = self.config.copy_mode;
        let bus_count = self.config.bus_count as usize;
        let mut sent = vec![Vec::new(); bus_count];
        let mut slots: Vec<FrameSlot> = (0..bus_count)
            .map(|_| FrameSlot {
                frame: Vec::new(),
                scratch: vec![0u8; self.config.largest_payload()],
            })
            .collect();

        for frame_no in 0..self.config.frame_count {
            let mut pending = 0;
            for bus in self.buses() {
                if !self.hooks.is_streaming(bus) {
                    warn!("{}: streaming interface closed, skipping frame {}", bus, frame_no);
                    continue;
                }

                let data = test_pattern(bus, frame_no, self.config.frame_len);
                let slot = &mut slots[bus.0 as usize];
                slot.frame.clear();
                if !copy_mode {
                    slot.frame.resize(header_len, 0);
                }
                slot.frame.extend_from_slice(&data);
                sent[bus.0 as usize].push(data);

                let transport = &mut self.transports[bus.0 as usize];
                self.registry
                    .start_stream(bus, self.config.endpoint, slot.source(copy_mode), transport)?;
                pending += 1;
            }

            while pending > 0 {
                let bus = completions.recv().await.ok_or(SimError::ChannelClosed)?;
                let slot = &mut slots[bus.0 as usize];
                let transport = &mut self.transports[bus.0 as usize];
                match self.registry.advance_stream(bus, slot.source(copy_mode), transport)? {
                    StreamStatus::Pending => {}
                    StreamStatus::Complete => {
                        debug!("{}: frame {} sent", bus, frame_no);
                        pending -= 1;
                    }
                    StreamStatus::Idle => warn!("{}: completion without a session", bus),
                }
            }

            if self.config.realtime {
                tokio::time::sleep(self.config.frame_interval()).await;
            }
        }
        Ok(sent)
    }
}

/// Per-bus results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub bus: u8,
    pub frames: usize,
    pub transfers: u64,
    pub bytes: u64,
    pub max_transfer: usize,
    pub max_payload: u32,
    pub frame_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub buses: Vec<BusStats>,
}

impl SimStats {
    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Run a full simulation and verify every captured frame
pub async fn run(config: &SimConfig) -> Result<SimStats, SimError> {
    let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();

    let mut device = SimDevice::new(config, transfer_tx)?;
    let committed = device.enumerate()?;
    let assemblers = device
        .buses()
        .zip(&committed)
        .map(|(bus, record)| FrameAssembler::new(bus, record.max_payload_transfer_size as usize, config.class.header_len))
        .collect();
    let host = tokio::spawn(loopback::run_host(transfer_rx, completion_tx, assemblers));

    let streamed = device.stream_frames(&mut completion_rx).await;
    let shutdown = device.shutdown();
    // Dropping the transports lets the host task finish
    drop(device);

    // A host-side violation explains a closed channel on the device side
    let assemblers = host.await??;
    let sent = streamed?;
    shutdown?;

    let mut buses = Vec::new();
    for ((assembler, frames), record) in assemblers.iter().zip(&sent).zip(&committed) {
        let bus = assembler.bus().0;
        if assembler.frames().len() != frames.len() {
            return Err(SimError::FrameMismatch {
                bus,
                frame: assembler.frames().len().min(frames.len()),
            });
        }
        if let Some(frame) = assembler.frames().iter().zip(frames).position(|(got, want)| got != want) {
            return Err(SimError::FrameMismatch { bus, frame });
        }
        buses.push(BusStats {
            bus,
            frames: frames.len(),
            transfers: assembler.transfers(),
            bytes: assembler.bytes(),
            max_transfer: assembler.max_transfer(),
            max_payload: record.max_payload_transfer_size,
            frame_interval: record.frame_interval,
        });
    }

    info!("simulation complete: {} bus(es)", buses.len());
    Ok(SimStats { buses })
}
