use std::{future::Future, io};

use bytes::Bytes;
use thiserror::Error;

use crate::source::{perf::PerfBufReader, ringbuf::RingBufReader};

/// One record exactly as delivered by a shared buffer.
pub type RawRecord = Bytes;

/// Errors returned by [`PacketReader`] implementations.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The buffer was permanently closed from outside; no further records will arrive.
    #[error("end of stream: all buffers were closed by their producer")]
    EndOfStream,

    /// The reader has been closed with [`PacketReader::close`].
    #[error("packet reader is closed")]
    Closed,

    /// Waiting on or reading from the buffer file descriptor failed.
    #[error("buffer i/o error: {0}")]
    Io(#[from] io::Error),

    /// A per-CPU perf buffer reported an error.
    #[error("perf buffer error on cpu {cpu}: {message}")]
    Perf { cpu: u32, message: String },
}

/// A source of raw packet records backed by a kernel-filled shared buffer.
///
/// `read` suspends until a record is available; it never busy-polls. Once
/// `close` has been called, `read` fails with [`ReadError::Closed`] immediately.
/// Dropping a pending `read` future never loses a record.
pub trait PacketReader: Send {
    fn read(&mut self) -> impl Future<Output = Result<RawRecord, ReadError>> + Send;

    /// Releases the underlying buffer. A second call fails with [`ReadError::Closed`].
    fn close(&mut self) -> Result<(), ReadError>;
}

/// The delivery strategy selected for this run.
pub enum Reader {
    Ring(RingBufReader),
    Perf(PerfBufReader),
}

impl PacketReader for Reader {
    async fn read(&mut self) -> Result<RawRecord, ReadError> {
        match self {
            Reader::Ring(reader) => reader.read().await,
            Reader::Perf(reader) => reader.read().await,
        }
    }

    fn close(&mut self) -> Result<(), ReadError> {
        match self {
            Reader::Ring(reader) => reader.close(),
            Reader::Perf(reader) => reader.close(),
        }
    }
}

impl From<RingBufReader> for Reader {
    fn from(reader: RingBufReader) -> Self {
        Reader::Ring(reader)
    }
}

impl From<PerfBufReader> for Reader {
    fn from(reader: PerfBufReader) -> Self {
        Reader::Perf(reader)
    }
}
