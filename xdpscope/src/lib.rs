//! xdpscope observes IPv4 TCP/UDP packets at an XDP hook and streams a compact
//! record for each one to userspace, through a BPF ring buffer where the kernel
//! supports it and through per-CPU perf buffers otherwise.

pub mod attach;
pub mod error;
pub mod health;
pub mod metrics;
pub mod packet;
pub mod runtime;
pub mod sink;
pub mod source;
