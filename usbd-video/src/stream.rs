//! # Payload Fragmentation Engine
//!
//! Splits one video frame into payload transfers no larger than the
//! committed `dwMaxPayloadTransferSize`, each prefixed by a payload header.
//! The engine is resumable: `start` submits the first transfer and every
//! completion reported by the transport calls `advance`, which submits the
//! next one.
//!
//! The session only records where it is inside the frame. The buffers stay
//! with the caller, who lends the same frame again on every `advance`; the
//! session checks that it is handed the buffer it started with.
//!
//! ## Buffer Modes
//!
//! ```text
//! Copy:       scratch  ┌────────┬──────────────────┐
//!                      │ header │ frame[off..off+n]│ ◄── memcpy per fragment
//!                      └────────┴──────────────────┘
//!
//! Zero-copy:  frame    ┌────────┬─────────────────────────────────────────┐
//!                      │reserved│ frame data ...                          │
//!                      └────────┴─────────────────────────────────────────┘
//!                      ▲ header for fragment k is written over the tail of
//!                        fragment k-1, which the host has already received
//! ```
//!
//! ## Session Lifecycle
//!
//! ```text
//!            start            advance (data left)
//! Idle ──────────────► Sending ◄──────────────┐
//!  ▲                     │  │                 │
//!  │ advance             │  └─────────────────┘
//!  │ (Complete)          │ last fragment submitted
//!  └──────────────── Finished
//!
//! abort / start / bus reset: any state ──► Idle (or a fresh Sending)
//! ```

use log::{debug, trace};
use thiserror::Error;

use crate::protocol::{PayloadHeader, MIN_HEADER_LEN};
use crate::traits::VideoTransport;

/// Errors reported by the engine
///
/// All of them are reported before any state changes or any transfer is
/// submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamError {
    /// The host has not selected a configuration
    #[error("device not configured")]
    DeviceNotConfigured,
    /// Zero-length frame
    #[error("empty frame")]
    EmptyFrame,
    /// Copy-mode scratch buffer cannot hold the largest fragment
    #[error("scratch buffer holds {available} bytes, fragment needs {needed}")]
    ScratchTooSmall { needed: usize, available: usize },
    /// The committed payload size leaves no room for data after the header
    #[error("max payload {max_payload} cannot carry a {header_len}-byte header")]
    PayloadTooSmall { max_payload: usize, header_len: u8 },
    /// `advance` was handed a different frame than the session started with
    #[error("frame buffer differs from the one being streamed")]
    SourceMismatch,
}

/// Frame buffer lent to the engine for one call
#[derive(Debug)]
pub enum FrameSource<'a> {
    /// Each fragment is copied behind a header in `scratch`
    Copy { scratch: &'a mut [u8], frame: &'a [u8] },
    /// Headers are written into the frame buffer itself
    ///
    /// The first `header_len` bytes of `frame` are reserved for the first
    /// header; frame data starts right after them.
    ZeroCopy { frame: &'a mut [u8] },
}

impl FrameSource<'_> {
    /// Number of frame data bytes
    pub fn frame_len(&self, header_len: u8) -> usize {
        match self {
            FrameSource::Copy { frame, .. } => frame.len(),
            FrameSource::ZeroCopy { frame } => frame.len().saturating_sub(header_len as usize),
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, FrameSource::Copy { .. })
    }

    fn frame_addr(&self) -> usize {
        match self {
            FrameSource::Copy { frame, .. } => frame.as_ptr() as usize,
            FrameSource::ZeroCopy { frame } => frame.as_ptr() as usize,
        }
    }

    fn check_scratch(&self, needed: usize) -> Result<(), StreamError> {
        match self {
            FrameSource::Copy { scratch, .. } if scratch.len() < needed => Err(StreamError::ScratchTooSmall {
                needed,
                available: scratch.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// Result of handling one transfer completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamStatus {
    /// Another fragment was submitted
    Pending,
    /// The closing fragment completed; the session is gone
    Complete,
    /// No session was active; nothing submitted
    Idle,
}

/// In-flight state of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamSession {
    endpoint: u8,
    copy: bool,
    /// Identity of the lent frame buffer
    frame_addr: usize,
    total: usize,
    offset: usize,
    remaining: usize,
    /// Data bytes per fragment, fixed at start
    chunk_capacity: usize,
    /// The closing fragment has been submitted
    finished: bool,
}

impl StreamSession {
    fn verify(&self, source: &FrameSource<'_>, header_len: u8) -> Result<(), StreamError> {
        if source.is_copy() != self.copy
            || source.frame_addr() != self.frame_addr
            || source.frame_len(header_len) != self.total
        {
            return Err(StreamError::SourceMismatch);
        }
        source.check_scratch(header_len as usize + self.remaining.min(self.chunk_capacity))
    }

    /// Write the next header and submit the next fragment
    fn emit_next<T>(&mut self, source: FrameSource<'_>, header_len: u8, frame_id: &mut bool, transport: &mut T)
    where
        T: VideoTransport + ?Sized,
    {
        let hl = header_len as usize;
        let chunk = self.remaining.min(self.chunk_capacity);
        let offset = self.offset;

        self.offset += chunk;
        self.remaining -= chunk;
        debug_assert_eq!(self.offset + self.remaining, self.total);

        let header = PayloadHeader {
            length: header_len,
            frame_id: *frame_id,
            end_of_frame: self.remaining == 0,
        };
        if header.end_of_frame {
            *frame_id = !*frame_id;
            self.finished = true;
        }

        trace!(
            "fragment offset={} len={} eof={} fid={}",
            offset,
            chunk,
            header.end_of_frame,
            header.frame_id
        );

        match source {
            FrameSource::Copy { scratch, frame } => {
                header.write(&mut scratch[..hl]);
                scratch[hl..hl + chunk].copy_from_slice(&frame[offset..offset + chunk]);
                transport.start_write(self.endpoint, &scratch[..hl + chunk]);
            }
            FrameSource::ZeroCopy { frame } => {
                // Data byte `offset` lives at frame[hl + offset]
                header.write(&mut frame[offset..offset + hl]);
                transport.start_write(self.endpoint, &frame[offset..offset + hl + chunk]);
            }
        }
    }
}

/// Per-bus fragmentation engine
///
/// Holds at most one session plus the frame identifier bit, which survives
/// sessions and flips once per completed frame.
#[derive(Debug, Clone)]
pub struct VideoStream {
    session: Option<StreamSession>,
    frame_id: bool,
    header_len: u8,
}

impl VideoStream {
    pub const fn new(header_len: u8) -> Self {
        Self {
            session: None,
            frame_id: false,
            header_len,
        }
    }

    pub fn header_len(&self) -> u8 {
        self.header_len
    }

    /// Frame identifier the next fragment's header will carry
    pub fn frame_id(&self) -> bool {
        self.frame_id
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Bytes of the current frame not yet submitted
    pub fn remaining(&self) -> Option<usize> {
        self.session.as_ref().map(|session| session.remaining)
    }

    /// Begin streaming a frame and submit its first fragment
    ///
    /// Any unfinished session is discarded. `max_payload` is the committed
    /// maximum payload transfer size, header included.
    pub fn start<T>(
        &mut self,
        max_payload: usize,
        endpoint: u8,
        source: FrameSource<'_>,
        transport: &mut T,
    ) -> Result<(), StreamError>
    where
        T: VideoTransport + ?Sized,
    {
        if !transport.is_configured() {
            return Err(StreamError::DeviceNotConfigured);
        }

        let total = source.frame_len(self.header_len);
        if total == 0 {
            return Err(StreamError::EmptyFrame);
        }

        let hl = self.header_len as usize;
        if self.header_len < MIN_HEADER_LEN || max_payload <= hl {
            return Err(StreamError::PayloadTooSmall {
                max_payload,
                header_len: self.header_len,
            });
        }
        let chunk_capacity = max_payload - hl;
        source.check_scratch(hl + total.min(chunk_capacity))?;

        if let Some(previous) = self.session.take() {
            debug!(
                "discarding unfinished frame, {} of {} bytes unsent",
                previous.remaining, previous.total
            );
        }

        debug!(
            "stream start ep=0x{:02x} len={} copy={} fid={}",
            endpoint,
            total,
            source.is_copy(),
            self.frame_id
        );

        let session = self.session.insert(StreamSession {
            endpoint,
            copy: source.is_copy(),
            frame_addr: source.frame_addr(),
            total,
            offset: 0,
            remaining: total,
            chunk_capacity,
            finished: false,
        });
        session.emit_next(source, self.header_len, &mut self.frame_id, transport);
        Ok(())
    }

    /// Handle one transfer completion
    ///
    /// `source` must lend the same frame buffer passed to `start`.
    pub fn advance<T>(&mut self, source: FrameSource<'_>, transport: &mut T) -> Result<StreamStatus, StreamError>
    where
        T: VideoTransport + ?Sized,
    {
        let Some(session) = self.session.as_mut() else {
            return Ok(StreamStatus::Idle);
        };

        if session.finished {
            debug!("stream complete, {} bytes", session.total);
            self.session = None;
            return Ok(StreamStatus::Complete);
        }

        session.verify(&source, self.header_len)?;
        session.emit_next(source, self.header_len, &mut self.frame_id, transport);
        Ok(StreamStatus::Pending)
    }

    /// Drop the live session, if any
    ///
    /// Returns whether a session was aborted.
    pub fn abort(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                debug!("stream aborted at offset {} of {}", session.offset, session.total);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::HEADER_EOH;

    const HL: u8 = 12;

    #[derive(Default)]
    struct RecordingTransport {
        unconfigured: bool,
        transfers: Vec<(u8, Vec<u8>)>,
    }

    impl VideoTransport for RecordingTransport {
        fn is_configured(&self) -> bool {
            !self.unconfigured
        }

        fn start_write(&mut self, endpoint: u8, data: &[u8]) {
            self.transfers.push((endpoint, data.to_vec()));
        }
    }

    impl RecordingTransport {
        fn headers(&self) -> Vec<PayloadHeader> {
            self.transfers
                .iter()
                .map(|(_, t)| PayloadHeader::parse(t).unwrap())
                .collect()
        }

        fn payload(&self) -> Vec<u8> {
            self.transfers
                .iter()
                .flat_map(|(_, t)| t[HL as usize..].iter().copied())
                .collect()
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    /// Stream a whole frame in copy mode
    fn send_copy(stream: &mut VideoStream, max_payload: usize, frame: &[u8], transport: &mut RecordingTransport) {
        let mut scratch = vec![0u8; max_payload];
        stream
            .start(max_payload, 0x81, FrameSource::Copy { scratch: &mut scratch, frame }, transport)
            .unwrap();
        loop {
            match stream.advance(FrameSource::Copy { scratch: &mut scratch, frame }, transport).unwrap() {
                StreamStatus::Pending => continue,
                StreamStatus::Complete => break,
                StreamStatus::Idle => panic!("session vanished"),
            }
        }
    }

    #[test]
    fn test_three_fragment_frame() {
        let frame = pattern(3000);
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);

        send_copy(&mut stream, 1023, &frame, &mut transport);

        let lengths: Vec<usize> = transport.transfers.iter().map(|(_, t)| t.len() - 12).collect();
        assert_eq!(lengths, [1011, 1011, 978]);

        let eofs: Vec<bool> = transport.headers().iter().map(|h| h.end_of_frame).collect();
        assert_eq!(eofs, [false, false, true]);
        assert!(transport.transfers.iter().all(|(ep, _)| *ep == 0x81));
        assert_eq!(transport.payload(), frame);
        assert!(!stream.is_active());
    }

    #[test]
    fn test_fragment_count_matches_ceiling() {
        for (len, max_payload) in [(1, 13), (11, 23), (12, 23), (1011, 1023), (1012, 1023), (5000, 512), (64, 3072)] {
            let frame = pattern(len);
            let mut transport = RecordingTransport::default();
            let mut stream = VideoStream::new(HL);

            send_copy(&mut stream, max_payload, &frame, &mut transport);

            let chunk = max_payload - HL as usize;
            assert_eq!(transport.transfers.len(), len.div_ceil(chunk), "len={len} max={max_payload}");
            assert!(transport.transfers.iter().all(|(_, t)| t.len() <= max_payload));

            let headers = transport.headers();
            assert_eq!(headers.iter().filter(|h| h.end_of_frame).count(), 1);
            assert!(headers.last().unwrap().end_of_frame);
            assert_eq!(transport.payload(), frame);
        }
    }

    #[test]
    fn test_single_fragment_frame_completes_on_first_advance() {
        let frame = pattern(100);
        let mut scratch = [0u8; 1023];
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);

        stream
            .start(1023, 0x81, FrameSource::Copy { scratch: &mut scratch, frame: &frame }, &mut transport)
            .unwrap();
        assert_eq!(transport.transfers.len(), 1);
        assert_eq!(transport.transfers[0].1[1], HEADER_EOH | 0x02);
        assert!(stream.frame_id());

        let status = stream.advance(FrameSource::Copy { scratch: &mut scratch, frame: &frame }, &mut transport);
        assert_eq!(status, Ok(StreamStatus::Complete));
        assert_eq!(transport.transfers.len(), 1);

        let status = stream.advance(FrameSource::Copy { scratch: &mut scratch, frame: &frame }, &mut transport);
        assert_eq!(status, Ok(StreamStatus::Idle));
    }

    #[test]
    fn test_frame_id_alternates_per_frame() {
        let frame = pattern(2500);
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);

        for expected in [false, true, false, true] {
            transport.transfers.clear();
            send_copy(&mut stream, 1023, &frame, &mut transport);
            assert!(transport.headers().iter().all(|h| h.frame_id == expected));
        }
    }

    #[test]
    fn test_zero_copy_matches_copy_mode() {
        let frame = pattern(2500);
        let mut copy = RecordingTransport::default();
        send_copy(&mut VideoStream::new(HL), 512, &frame, &mut copy);

        let mut aliased = vec![0u8; HL as usize];
        aliased.extend_from_slice(&frame);
        let mut zero_copy = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);
        stream
            .start(512, 0x81, FrameSource::ZeroCopy { frame: &mut aliased }, &mut zero_copy)
            .unwrap();
        while stream.advance(FrameSource::ZeroCopy { frame: &mut aliased }, &mut zero_copy) == Ok(StreamStatus::Pending) {}

        assert_eq!(copy.transfers, zero_copy.transfers);
        assert_eq!(zero_copy.payload(), frame);
    }

    #[test]
    fn test_restart_discards_previous_frame() {
        let first = vec![0xAAu8; 5000];
        let second = vec![0x55u8; 1500];
        let mut scratch = [0u8; 1023];
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);

        stream
            .start(1023, 0x81, FrameSource::Copy { scratch: &mut scratch, frame: &first }, &mut transport)
            .unwrap();
        let status = stream.advance(FrameSource::Copy { scratch: &mut scratch, frame: &first }, &mut transport);
        assert_eq!(status, Ok(StreamStatus::Pending));
        transport.transfers.clear();

        send_copy(&mut stream, 1023, &second, &mut transport);

        assert_eq!(transport.transfers.len(), 2);
        assert_eq!(transport.payload(), second);
        // The abandoned frame never completed, so it did not flip the bit
        assert!(transport.headers().iter().all(|h| !h.frame_id));
    }

    #[test]
    fn test_zero_copy_restart_reuses_buffer() {
        let hl = HL as usize;
        let mut buffer = vec![0u8; hl + 5000];
        buffer[hl..].fill(0xAA);
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);

        stream
            .start(1023, 0x81, FrameSource::ZeroCopy { frame: &mut buffer }, &mut transport)
            .unwrap();
        let status = stream.advance(FrameSource::ZeroCopy { frame: &mut buffer }, &mut transport);
        assert_eq!(status, Ok(StreamStatus::Pending));
        transport.transfers.clear();

        // Same allocation, shorter frame
        let second = &mut buffer[..hl + 1500];
        second[..hl].fill(0);
        second[hl..].fill(0x55);
        stream
            .start(1023, 0x81, FrameSource::ZeroCopy { frame: &mut *second }, &mut transport)
            .unwrap();
        while stream.advance(FrameSource::ZeroCopy { frame: &mut *second }, &mut transport) == Ok(StreamStatus::Pending) {}

        assert_eq!(transport.transfers.len(), 2);
        assert_eq!(transport.transfers[0].1.len(), hl + 1011);
        assert_eq!(transport.transfers[1].1.len(), hl + 489);
        // First header sits at the start of the buffer, second over byte 1011
        assert_eq!(transport.transfers[0].1[..hl], second[..hl]);
        assert_eq!(transport.transfers[1].1[..hl], second[1011..1011 + hl]);

        let headers = transport.headers();
        assert!(headers.iter().all(|h| !h.frame_id));
        assert_eq!(headers.iter().map(|h| h.end_of_frame).collect::<Vec<_>>(), [false, true]);
        assert_eq!(transport.payload(), vec![0x55u8; 1500]);
        assert!(stream.frame_id());
    }

    #[test]
    fn test_rejected_start_leaves_state_untouched() {
        let frame = pattern(3000);
        let mut scratch = [0u8; 1023];
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);
        stream
            .start(1023, 0x81, FrameSource::Copy { scratch: &mut scratch, frame: &frame }, &mut transport)
            .unwrap();
        let submitted = transport.transfers.len();

        let empty = FrameSource::Copy { scratch: &mut scratch, frame: &[] };
        assert_eq!(stream.start(1023, 0x81, empty, &mut transport), Err(StreamError::EmptyFrame));

        let mut small = [0u8; 64];
        let cramped = FrameSource::Copy { scratch: &mut small, frame: &frame };
        assert_eq!(
            stream.start(1023, 0x81, cramped, &mut transport),
            Err(StreamError::ScratchTooSmall { needed: 1023, available: 64 })
        );

        let mut header_only = [0u8; 12];
        let bare = FrameSource::ZeroCopy { frame: &mut header_only };
        assert_eq!(stream.start(1023, 0x81, bare, &mut transport), Err(StreamError::EmptyFrame));

        let squeezed = FrameSource::Copy { scratch: &mut scratch, frame: &frame };
        assert_eq!(
            stream.start(12, 0x81, squeezed, &mut transport),
            Err(StreamError::PayloadTooSmall { max_payload: 12, header_len: HL })
        );

        transport.unconfigured = true;
        let offline = FrameSource::Copy { scratch: &mut scratch, frame: &frame };
        assert_eq!(stream.start(1023, 0x81, offline, &mut transport), Err(StreamError::DeviceNotConfigured));

        assert_eq!(transport.transfers.len(), submitted);
        assert_eq!(stream.remaining(), Some(3000 - 1011));
    }

    #[test]
    fn test_advance_rejects_foreign_buffer() {
        let frame = pattern(3000);
        let other = pattern(3000);
        let mut scratch = [0u8; 1023];
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);
        stream
            .start(1023, 0x81, FrameSource::Copy { scratch: &mut scratch, frame: &frame }, &mut transport)
            .unwrap();

        let status = stream.advance(FrameSource::Copy { scratch: &mut scratch, frame: &other }, &mut transport);
        assert_eq!(status, Err(StreamError::SourceMismatch));

        let mut aliased = vec![0u8; 3012];
        let status = stream.advance(FrameSource::ZeroCopy { frame: &mut aliased }, &mut transport);
        assert_eq!(status, Err(StreamError::SourceMismatch));

        assert_eq!(transport.transfers.len(), 1);
        assert_eq!(stream.remaining(), Some(3000 - 1011));
    }

    #[test]
    fn test_abort_stops_advances() {
        let frame = pattern(3000);
        let mut scratch = [0u8; 1023];
        let mut transport = RecordingTransport::default();
        let mut stream = VideoStream::new(HL);
        stream
            .start(1023, 0x81, FrameSource::Copy { scratch: &mut scratch, frame: &frame }, &mut transport)
            .unwrap();

        assert!(stream.abort());
        assert!(!stream.abort());
        let status = stream.advance(FrameSource::Copy { scratch: &mut scratch, frame: &frame }, &mut transport);
        assert_eq!(status, Ok(StreamStatus::Idle));
        assert_eq!(transport.transfers.len(), 1);
        assert!(!stream.frame_id());
    }
}
