//! # Collaborator Interfaces
//!
//! The class core never talks to hardware directly. The USB device stack
//! plugs in through [`VideoTransport`] and the embedding application
//! receives stream start/stop signals through [`StreamHooks`].
//!
//! ```text
//!  ┌────────────┐  start_write   ┌───────────────┐  completion   ┌────────────┐
//!  │  usbd-video│───────────────►│ USB transport │──────────────►│ advance()  │
//!  │   engine   │                │  (DMA / FIFO) │  (out-of-band)│            │
//!  └────────────┘                └───────────────┘               └────────────┘
//! ```

use crate::BusId;

/// Endpoint side of the USB device stack for one bus
///
/// # Buffer Lifetime
///
/// `start_write` is asynchronous: it queues the transfer and returns. The
/// engine does not write `data` again before the next `advance`, and the
/// caller lends the same buffers back on that call, so a DMA implementation
/// may keep pointing at it until it reports completion.
pub trait VideoTransport {
    /// Whether the host has selected a configuration
    fn is_configured(&self) -> bool;

    /// Queue an IN transfer on `endpoint`
    ///
    /// Submission cannot fail at this layer; completion is reported
    /// out-of-band by calling `advance_stream` for the same bus.
    fn start_write(&mut self, endpoint: u8, data: &[u8]);
}

impl<T: VideoTransport + ?Sized> VideoTransport for &mut T {
    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }

    fn start_write(&mut self, endpoint: u8, data: &[u8]) {
        (**self).start_write(endpoint, data)
    }
}

/// Application hooks for alternate setting changes
///
/// Both methods default to doing nothing.
pub trait StreamHooks {
    /// Streaming alternate setting selected: start producing frames
    fn open(&mut self, bus: BusId, interface: u8) {
        let _ = (bus, interface);
    }

    /// Interface returned to an idle alternate setting: stop producing frames
    fn close(&mut self, bus: BusId, interface: u8) {
        let _ = (bus, interface);
    }
}

/// Hooks that ignore every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl StreamHooks for NoHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        opened: u8,
        closed: u8,
    }

    impl StreamHooks for Recorder {
        fn open(&mut self, _bus: BusId, _interface: u8) {
            self.opened += 1;
        }
    }

    #[test]
    fn test_default_close_is_noop() {
        let mut hooks = Recorder::default();
        hooks.open(BusId(0), 1);
        hooks.close(BusId(0), 1);
        assert_eq!(hooks.opened, 1);
        assert_eq!(hooks.closed, 0);
    }
}
