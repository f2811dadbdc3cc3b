//! Delivery mode selection.
//!
//! The XDP probe can hand records to userspace either through a BPF ring buffer
//! (kernel >= 5.8, single globally ordered buffer) or through a perf event array
//! (one buffer per CPU). The mode is decided exactly once at startup, before any
//! program is attached or reader constructed, and never revisited.

use std::{fmt, io, mem};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use xdpscope_common::{PERF_MAP_NAME, PERF_PROGRAM_NAME, RING_MAP_NAME, RING_PROGRAM_NAME};

/// `bpf(2)` command creating a map.
const BPF_MAP_CREATE: libc::c_long = 0;
/// `enum bpf_map_type` value of `BPF_MAP_TYPE_RINGBUF`.
const BPF_MAP_TYPE_RINGBUF: u32 = 27;
/// Kernel-internal "operation not supported" errno, leaked by some map types.
const ENOTSUPP: i32 = 524;

/// The shared buffer mechanism used for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    RingBuffer,
    PerfBuffer,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::RingBuffer => "ring_buffer",
            DeliveryMode::PerfBuffer => "perf_buffer",
        }
    }

    /// XDP program that writes into this mode's buffer.
    pub fn program_name(&self) -> &'static str {
        match self {
            DeliveryMode::RingBuffer => RING_PROGRAM_NAME,
            DeliveryMode::PerfBuffer => PERF_PROGRAM_NAME,
        }
    }

    /// XDP program belonging to the other mode; it must stay detached.
    pub fn excluded_program_name(&self) -> &'static str {
        match self {
            DeliveryMode::RingBuffer => PERF_PROGRAM_NAME,
            DeliveryMode::PerfBuffer => RING_PROGRAM_NAME,
        }
    }

    /// Name of the shared buffer map populated in this mode.
    pub fn map_name(&self) -> &'static str {
        match self {
            DeliveryMode::RingBuffer => RING_MAP_NAME,
            DeliveryMode::PerfBuffer => PERF_MAP_NAME,
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured delivery preference. `Auto` probes the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPreference {
    #[default]
    Auto,
    #[value(name = "ring_buffer")]
    RingBuffer,
    #[value(name = "perf_buffer")]
    PerfBuffer,
}

/// Outcome of the ring buffer feature probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBufSupport {
    Supported,
    /// The kernel explicitly rejected the map type. This is an expected outcome.
    Unsupported,
}

/// The feature probe failed for a reason other than missing kernel support.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ring buffer feature probe failed: {0}")]
    Syscall(#[source] io::Error),
}

/// Picks the delivery mode for this run.
///
/// A forced preference skips the probe entirely. With `Auto`, `probe` is called
/// once: `Supported` selects the ring buffer, `Unsupported` falls back to perf
/// buffers, and any probe error is returned to the caller as fatal.
pub fn select_mode<P>(preference: DeliveryPreference, probe: P) -> Result<DeliveryMode, ProbeError>
where
    P: FnOnce() -> Result<RingBufSupport, ProbeError>,
{
    let mode = match preference {
        DeliveryPreference::RingBuffer => DeliveryMode::RingBuffer,
        DeliveryPreference::PerfBuffer => DeliveryMode::PerfBuffer,
        DeliveryPreference::Auto => match probe()? {
            RingBufSupport::Supported => DeliveryMode::RingBuffer,
            RingBufSupport::Unsupported => {
                warn!(
                    event.name = "source.ringbuf_unsupported",
                    "kernel does not support BPF ring buffers, falling back to perf buffers"
                );
                DeliveryMode::PerfBuffer
            }
        },
    };

    info!(
        event.name = "source.mode_selected",
        delivery.mode = %mode,
        delivery.preference = ?preference,
        ebpf.program = mode.program_name(),
        ebpf.map = mode.map_name(),
        "selected packet delivery mode"
    );

    Ok(mode)
}

/// Leading fields of `union bpf_attr` for `BPF_MAP_CREATE`; the tail must be zero.
#[repr(C)]
struct MapCreateAttr {
    map_type: u32,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    rest: [u32; 14],
}

/// Asks the kernel whether it can create a `BPF_MAP_TYPE_RINGBUF` map.
///
/// Creates a one-page ring buffer and closes it immediately.
pub fn probe_ring_buf() -> Result<RingBufSupport, ProbeError> {
    // SAFETY: sysconf has no memory safety preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let max_entries = u32::try_from(page_size).unwrap_or(4096);

    let attr = MapCreateAttr {
        map_type: BPF_MAP_TYPE_RINGBUF,
        key_size: 0,
        value_size: 0,
        max_entries,
        rest: [0; 14],
    };

    // SAFETY: attr is a properly initialized, zero-padded prefix of bpf_attr that
    // outlives the call, and the size passed matches its layout.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            BPF_MAP_CREATE,
            &attr as *const MapCreateAttr,
            mem::size_of::<MapCreateAttr>() as libc::c_uint,
        )
    };

    if ret >= 0 {
        // SAFETY: ret is a map fd we own and no longer need.
        unsafe { libc::close(ret as libc::c_int) };
        debug!(
            event.name = "source.ringbuf_probe",
            supported = true,
            "ring buffer map created"
        );
        return Ok(RingBufSupport::Supported);
    }

    classify_probe_error(io::Error::last_os_error())
}

fn classify_probe_error(err: io::Error) -> Result<RingBufSupport, ProbeError> {
    match err.raw_os_error() {
        Some(libc::EINVAL) | Some(libc::E2BIG) | Some(ENOTSUPP) => {
            debug!(
                event.name = "source.ringbuf_probe",
                supported = false,
                error.message = %err,
                "ring buffer map rejected by kernel"
            );
            Ok(RingBufSupport::Unsupported)
        }
        _ => Err(ProbeError::Syscall(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_selects_ring_buffer() {
        let mode = select_mode(DeliveryPreference::Auto, || Ok(RingBufSupport::Supported));
        assert_eq!(mode.unwrap(), DeliveryMode::RingBuffer);
    }

    #[test]
    fn test_unsupported_selects_perf_buffer() {
        let mode = select_mode(DeliveryPreference::Auto, || {
            Ok(RingBufSupport::Unsupported)
        })
        .unwrap();

        assert_eq!(mode, DeliveryMode::PerfBuffer);
        assert_eq!(mode.program_name(), "xdp_ingress_perf");
        assert_eq!(mode.excluded_program_name(), "xdp_ingress_ring");
        assert_eq!(mode.map_name(), "perf_observed_packets");
    }

    #[test]
    fn test_probe_failure_is_an_error() {
        let result = select_mode(DeliveryPreference::Auto, || {
            Err(ProbeError::Syscall(io::Error::from_raw_os_error(
                libc::EPERM,
            )))
        });
        assert!(matches!(result, Err(ProbeError::Syscall(_))));
    }

    #[test]
    fn test_forced_preference_skips_probe() {
        let probe = || -> Result<RingBufSupport, ProbeError> {
            panic!("probe must not run when a mode is forced")
        };
        assert_eq!(
            select_mode(DeliveryPreference::PerfBuffer, probe).unwrap(),
            DeliveryMode::PerfBuffer
        );
        assert_eq!(
            select_mode(DeliveryPreference::RingBuffer, probe).unwrap(),
            DeliveryMode::RingBuffer
        );
    }

    #[test]
    fn test_probe_runs_once() {
        let mut calls = 0;
        let _ = select_mode(DeliveryPreference::Auto, || {
            calls += 1;
            Ok(RingBufSupport::Supported)
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_classify_probe_error() {
        for errno in [libc::EINVAL, libc::E2BIG, ENOTSUPP] {
            assert_eq!(
                classify_probe_error(io::Error::from_raw_os_error(errno)).unwrap(),
                RingBufSupport::Unsupported,
                "errno {errno} means unsupported"
            );
        }
        for errno in [libc::EPERM, libc::ENOMEM, libc::EFAULT] {
            assert!(
                classify_probe_error(io::Error::from_raw_os_error(errno)).is_err(),
                "errno {errno} must be fatal"
            );
        }
    }

    #[test]
    fn test_ring_mode_names() {
        let mode = DeliveryMode::RingBuffer;
        assert_eq!(mode.as_str(), "ring_buffer");
        assert_eq!(mode.program_name(), "xdp_ingress_ring");
        assert_eq!(mode.excluded_program_name(), "xdp_ingress_perf");
        assert_eq!(mode.map_name(), "ring_observed_packets");
    }

    #[test]
    #[ignore] // Only works when running with CAP_BPF or CAP_SYS_ADMIN
    fn test_probe_ring_buf_on_host() {
        let _ = probe_ring_buf().expect("probe should not fail with privileges");
    }
}
