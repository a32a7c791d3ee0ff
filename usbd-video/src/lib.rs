//! # USB Video Class Device Core
//!
//! Device-side building blocks for a UVC camera function:
//!
//! - **Request Router**: answers class-specific control requests for the
//!   video control and video streaming interfaces
//! - **Fragmentation Engine**: splits frames into headered payload transfers,
//!   resuming on every transfer completion
//! - **Bus Registry**: one isolated context per USB controller
//!
//! ## Architecture
//!
//! ```text
//!  host control transfer ──► BusRegistry::handle_class_request ──► RequestRouter
//!                                                                  │
//!                                        ControlRegisterBank ◄─────┤
//!                                        EntityTable / Policy ◄────┘
//!
//!  application frame ──► BusRegistry::start_stream ──► VideoTransport::start_write
//!                                    ▲                              │
//!                                    └──── advance_stream ◄─────────┘
//!                                          (transfer completion)
//! ```
//!
//! ## Buffer Strategy
//!
//! Nothing is allocated. Frames are lent to the engine per call, either
//! with a scratch buffer that receives a copy of each fragment or as a
//! single buffer whose leading bytes are reserved for headers so fragments
//! go out without a copy.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod bus;
pub mod controls;
pub mod entity;
pub mod protocol;
pub mod registers;
pub mod router;
pub mod stream;
pub mod traits;

// Re-export main types for convenience
pub use bus::{BusContext, BusEvent, BusId, BusRegistry, ClassConfig, Error};
pub use controls::{Control, ControlPolicy, ControlSetting};
pub use entity::{EntityDescriptor, EntityError, EntityKind, EntityTable};
pub use protocol::{ClassRequest, PayloadHeader, ProbeCommit, Request};
pub use registers::ControlRegisterBank;
pub use router::{NegotiationMode, RequestError, RequestRouter};
pub use stream::{FrameSource, StreamError, StreamStatus, VideoStream};
pub use traits::{NoHooks, StreamHooks, VideoTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
