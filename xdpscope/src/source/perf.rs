//! Perf event array reader for observed packet records.
//!
//! Used when the kernel has no BPF ring buffer support. The probe writes each
//! record into the perf buffer of the CPU it ran on, so there is one buffer per
//! online CPU and ordering is only guaranteed within a single CPU.
//!
//! # Multiplexing
//!
//! Every per-CPU buffer is drained by its own worker task into a bounded queue.
//! `read()` serves those queues round-robin: it starts at the CPU after the one
//! that produced the previous record and returns the first record that is ready.
//! With the same queue contents the output order is always the same, which keeps
//! the fan-in deterministic for a given arrival state.

use std::{future::poll_fn, task::Poll};

use aya::{
    maps::{
        MapData,
        perf::{AsyncPerfEventArray, AsyncPerfEventArrayBuffer, Events},
    },
    util::online_cpus,
};
use bytes::{Bytes, BytesMut};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};
use xdpscope_common::RECORD_SIZE;

use crate::{
    metrics,
    source::reader::{PacketReader, RawRecord, ReadError},
};

/// Size of a perf raw sample carrying one record.
///
/// The kernel pads raw samples so that the `u32` size header plus the payload is
/// a multiple of 8 bytes.
pub const PADDED_SAMPLE_SIZE: usize = (RECORD_SIZE + 4).div_ceil(8) * 8 - 4;

/// Number of sample buffers handed to each `read_events` call.
const EVENTS_PER_BATCH: usize = 16;

/// Tunables for the per-CPU perf buffers.
#[derive(Debug, Clone, Copy)]
pub struct PerfOptions {
    /// Pages of memory mapped per CPU buffer. Must be a power of two.
    pub pages_per_cpu: usize,
    /// Records buffered in userspace per CPU before the worker waits for `read()`.
    pub queue_capacity: usize,
}

impl Default for PerfOptions {
    fn default() -> Self {
        Self {
            pages_per_cpu: 8,
            queue_capacity: 1024,
        }
    }
}

/// Item carried by a per-CPU queue.
pub type CpuItem = Result<RawRecord, ReadError>;

struct CpuQueue {
    cpu: u32,
    rx: mpsc::Receiver<CpuItem>,
    exhausted: bool,
}

/// Reads records from the per-CPU buffers of a BPF perf event array.
pub struct PerfBufReader {
    queues: Vec<CpuQueue>,
    cursor: usize,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl PerfBufReader {
    /// Opens one perf buffer per online CPU and starts a worker task for each.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        mut array: AsyncPerfEventArray<MapData>,
        options: PerfOptions,
    ) -> Result<Self, ReadError> {
        let cpus = online_cpus().map_err(|(msg, err)| {
            ReadError::Io(std::io::Error::new(err.kind(), format!("{msg}: {err}")))
        })?;

        let mut queues = Vec::with_capacity(cpus.len());
        let mut workers = Vec::with_capacity(cpus.len());

        for cpu in cpus {
            let buf = array
                .open(cpu, Some(options.pages_per_cpu))
                .map_err(|e| ReadError::Perf {
                    cpu,
                    message: format!("failed to open perf buffer: {e}"),
                })?;

            let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
            workers.push(tokio::spawn(drain_cpu_buffer(cpu, buf, tx)));
            queues.push((cpu, rx));
        }

        info!(
            event.name = "source.perf.opened",
            cpu_count = queues.len(),
            pages_per_cpu = options.pages_per_cpu,
            "reading observed packets from per-cpu perf buffers"
        );

        let mut reader = Self::from_queues(queues);
        reader.workers = workers;
        Ok(reader)
    }

    /// Builds a reader over already-populated per-CPU queues.
    ///
    /// Queues are served in the order given. A queue whose sender is dropped is
    /// treated as exhausted; once every queue is exhausted `read()` returns
    /// [`ReadError::EndOfStream`].
    pub fn from_queues(queues: Vec<(u32, mpsc::Receiver<CpuItem>)>) -> Self {
        Self {
            queues: queues
                .into_iter()
                .map(|(cpu, rx)| CpuQueue {
                    cpu,
                    rx,
                    exhausted: false,
                })
                .collect(),
            cursor: 0,
            workers: Vec::new(),
            closed: false,
        }
    }

    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> Poll<CpuItem> {
        let count = self.queues.len();
        let mut exhausted = 0;

        for step in 0..count {
            let idx = (self.cursor + step) % count;
            let queue = &mut self.queues[idx];
            if queue.exhausted {
                exhausted += 1;
                continue;
            }

            match queue.rx.poll_recv(cx) {
                Poll::Ready(Some(item)) => {
                    self.cursor = (idx + 1) % count;
                    return Poll::Ready(item);
                }
                Poll::Ready(None) => {
                    debug!(
                        event.name = "source.perf.cpu_exhausted",
                        cpu = queue.cpu,
                        "per-cpu perf queue closed"
                    );
                    queue.exhausted = true;
                    exhausted += 1;
                }
                Poll::Pending => {}
            }
        }

        if exhausted == count {
            Poll::Ready(Err(ReadError::EndOfStream))
        } else {
            Poll::Pending
        }
    }

    fn abort_workers(&mut self) {
        for worker in self.workers.drain(..) {
            worker.abort();
        }
    }
}

impl PacketReader for PerfBufReader {
    async fn read(&mut self) -> Result<RawRecord, ReadError> {
        if self.closed {
            return Err(ReadError::Closed);
        }
        poll_fn(|cx| self.poll_next(cx)).await
    }

    fn close(&mut self) -> Result<(), ReadError> {
        if self.closed {
            return Err(ReadError::Closed);
        }
        self.closed = true;
        self.abort_workers();
        self.queues.clear();

        debug!(
            event.name = "source.perf.closed",
            "perf buffer reader closed"
        );
        Ok(())
    }
}

impl Drop for PerfBufReader {
    fn drop(&mut self) {
        self.abort_workers();
    }
}

/// Strips the kernel's raw sample padding from a sample carrying one record.
///
/// Samples of any other size are passed through untouched so the decoder can
/// reject them.
pub fn strip_sample_padding(sample: &[u8]) -> &[u8] {
    if sample.len() == PADDED_SAMPLE_SIZE {
        &sample[..RECORD_SIZE]
    } else {
        sample
    }
}

async fn drain_cpu_buffer(
    cpu: u32,
    mut buf: AsyncPerfEventArrayBuffer<MapData>,
    tx: mpsc::Sender<CpuItem>,
) {
    let mut buffers = (0..EVENTS_PER_BATCH)
        .map(|_| BytesMut::with_capacity(PADDED_SAMPLE_SIZE))
        .collect::<Vec<_>>();

    loop {
        let Events { read, lost } = match buf.read_events(&mut buffers).await {
            Ok(events) => events,
            Err(e) => {
                error!(
                    event.name = "source.perf.read_failed",
                    cpu,
                    error.message = %e,
                    "perf buffer read failure"
                );
                let item = Err(ReadError::Perf {
                    cpu,
                    message: e.to_string(),
                });
                if tx.send(item).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if lost > 0 {
            warn!(
                event.name = "source.perf.samples_lost",
                cpu,
                lost,
                "perf buffer lost samples"
            );
            metrics::ingest::inc_perf_lost_samples(lost as u64);
        }

        for buffer in buffers.iter_mut().take(read) {
            let record = Bytes::copy_from_slice(strip_sample_padding(buffer));
            buffer.clear();
            if tx.send(Ok(record)).await.is_err() {
                return;
            }
        }
    }
}
