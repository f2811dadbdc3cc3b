//! Packet record sources.
//!
//! This module contains everything between the kernel-filled shared buffers and
//! the consumer of decoded packets.
//!
//! # Architecture
//!
//! - `mode`: One-shot probe that picks the delivery mechanism for this run
//! - `reader`: The `PacketReader` capability and the `Reader` sum type
//! - `ringbuf`: Reader over the single BPF ring buffer
//! - `perf`: Reader over the per-CPU BPF perf buffers
//! - `ingest`: Cancellable loop that drains a reader into a `PacketSink`

pub mod ingest;
pub mod mode;
pub mod perf;
pub mod reader;
pub mod ringbuf;
