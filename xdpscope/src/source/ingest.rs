//! The ingestion loop.
//!
//! Owns the selected reader for the lifetime of the run, decodes each raw
//! record and forwards the result to a [`PacketSink`]. Shutdown is cooperative:
//! the loop checks the shutdown channel at the top of every iteration and also
//! races it against the pending read, so an idle buffer never delays shutdown.

use std::fmt;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::{
    metrics,
    packet::decode,
    sink::PacketSink,
    source::reader::{PacketReader, ReadError},
};

/// Lifecycle of an [`IngestionLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Running,
    /// Shutdown was requested; no new read will be started.
    Draining,
    Stopped,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Running => "running",
            IngestState::Draining => "draining",
            IngestState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated over one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Raw records returned by the reader.
    pub records: u64,
    /// Records that decoded and reached the sink.
    pub packets: u64,
    pub malformed: u64,
    pub read_errors: u64,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to close packet reader: {0}")]
    Close(#[source] ReadError),
}

/// Drains a [`PacketReader`] into a [`PacketSink`] until shutdown or end of stream.
pub struct IngestionLoop<R, S> {
    reader: R,
    sink: S,
    shutdown_rx: broadcast::Receiver<()>,
    state: IngestState,
    stats: IngestStats,
}

impl<R, S> IngestionLoop<R, S>
where
    R: PacketReader,
    S: PacketSink,
{
    pub fn new(reader: R, sink: S, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            reader,
            sink,
            shutdown_rx,
            state: IngestState::Running,
            stats: IngestStats::default(),
        }
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Runs until shutdown is signalled or the reader reports end of stream,
    /// then closes the reader exactly once.
    ///
    /// Transient read errors and malformed records are logged, counted and
    /// skipped. The only error returned is a failure to close the reader.
    pub async fn run(mut self) -> Result<IngestStats, IngestError> {
        info!(
            event.name = "task.started",
            task.name = "ingestion_loop",
            ingest.state = %self.state,
            "ingestion loop started"
        );

        while self.state == IngestState::Running {
            if self.shutdown_requested() {
                self.transition(IngestState::Draining);
                break;
            }

            let outcome = tokio::select! {
                biased;
                result = self.reader.read() => Some(result),
                _ = self.shutdown_rx.recv() => None,
            };

            match outcome {
                Some(Ok(record)) => self.handle_record(&record),
                Some(Err(ReadError::EndOfStream)) => {
                    info!(
                        event.name = "ingest.end_of_stream",
                        "all packet buffers were closed by their producer"
                    );
                    break;
                }
                Some(Err(e)) => {
                    self.stats.read_errors += 1;
                    metrics::ingest::inc_read_errors();
                    warn!(
                        event.name = "ingest.read_failed",
                        error.message = %e,
                        "failed to read packet record, continuing"
                    );
                }
                None => self.transition(IngestState::Draining),
            }
        }

        self.transition(IngestState::Stopped);

        self.reader.close().map_err(IngestError::Close)?;

        info!(
            event.name = "task.stopped",
            task.name = "ingestion_loop",
            ingest.records = self.stats.records,
            ingest.packets = self.stats.packets,
            ingest.malformed = self.stats.malformed,
            ingest.read_errors = self.stats.read_errors,
            "ingestion loop stopped"
        );

        Ok(self.stats)
    }

    fn handle_record(&mut self, record: &[u8]) {
        self.stats.records += 1;
        metrics::ingest::inc_records();

        match decode(record) {
            Ok(packet) => {
                self.stats.packets += 1;
                metrics::ingest::inc_packets();
                self.sink.accept(packet);
            }
            Err(e) => {
                self.stats.malformed += 1;
                metrics::ingest::inc_malformed();
                warn!(
                    event.name = "ingest.decode_failed",
                    error.message = %e,
                    record.len = record.len(),
                    "skipping malformed packet record"
                );
            }
        }
    }

    /// A sent signal, a lagged receiver and a dropped sender all count as shutdown.
    fn shutdown_requested(&mut self) -> bool {
        !matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Empty))
    }

    fn transition(&mut self, next: IngestState) {
        if self.state == next {
            return;
        }
        debug!(
            event.name = "ingest.state_changed",
            ingest.state.from = %self.state,
            ingest.state.to = %next,
            "ingestion loop state changed"
        );
        self.state = next;
    }
}
