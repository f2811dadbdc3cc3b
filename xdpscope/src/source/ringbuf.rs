//! Ring buffer reader for observed packet records.
//!
//! This module provides the `RingBufReader` which reads records from the single
//! BPF ring buffer (`ring_observed_packets`) in an event-driven manner. The ring
//! buffer preserves producer order across all CPUs.

use std::os::fd::AsRawFd;

use aya::maps::{MapData, RingBuf};
use bytes::Bytes;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use crate::source::reader::{PacketReader, RawRecord, ReadError};

/// A file-descriptor-backed buffer that can be drained without blocking.
///
/// The descriptor becomes readable whenever new records are available.
pub trait RingSource: AsRawFd + Send {
    /// Returns the next pending record, or `None` if the buffer is currently empty.
    fn next_record(&mut self) -> Option<RawRecord>;
}

impl RingSource for RingBuf<MapData> {
    fn next_record(&mut self) -> Option<RawRecord> {
        self.next().map(|item| Bytes::copy_from_slice(&item))
    }
}

/// Reads records from a BPF ring buffer.
///
/// The reader uses `AsyncFd` to wait for readability, so an idle buffer costs
/// nothing. Records already queued when the fd becomes readable are handed out
/// one per `read()` before waiting again.
pub struct RingBufReader<S: RingSource = RingBuf<MapData>> {
    ring_buf: Option<AsyncFd<S>>,
}

impl<S: RingSource> RingBufReader<S> {
    /// Creates a new RingBufReader. Must be called from within a tokio runtime.
    pub fn new(ring_buf: S) -> Result<Self, ReadError> {
        let async_fd = AsyncFd::new(ring_buf)?;
        info!(
            event.name = "source.ringbuf.opened",
            "reading observed packets from ring buffer"
        );

        Ok(Self {
            ring_buf: Some(async_fd),
        })
    }
}

impl<S: RingSource> PacketReader for RingBufReader<S> {
    async fn read(&mut self) -> Result<RawRecord, ReadError> {
        let async_fd = self.ring_buf.as_mut().ok_or(ReadError::Closed)?;

        loop {
            // Wait for the ring buffer to be readable (event-driven, no busy-loop)
            let mut guard = async_fd.readable_mut().await?;

            if let Some(record) = guard.get_inner_mut().next_record() {
                return Ok(record);
            }

            // Only clears if no new readiness event arrived since the guard was taken.
            guard.clear_ready();
        }
    }

    fn close(&mut self) -> Result<(), ReadError> {
        let async_fd = self.ring_buf.take().ok_or(ReadError::Closed)?;
        drop(async_fd.into_inner());

        debug!(
            event.name = "source.ringbuf.closed",
            "ring buffer reader closed"
        );
        Ok(())
    }
}
