//! Loading the probe object and attaching the XDP program for the selected mode.
//!
//! The object file carries one XDP program and one shared buffer map per
//! delivery mode. Only the program matching the selected mode is loaded and
//! attached; the other one stays detached so records are never split across
//! both buffers.

use std::path::{Path, PathBuf};

use aya::{
    Ebpf, EbpfError, EbpfLoader,
    maps::{MapError, RingBuf, perf::AsyncPerfEventArray},
    programs::{ProgramError, Xdp, XdpFlags},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::source::{
    mode::DeliveryMode,
    perf::{PerfBufReader, PerfOptions},
    reader::{ReadError, Reader},
    ringbuf::RingBufReader,
};

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to load eBPF object {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: Box<EbpfError>,
    },

    #[error("eBPF program '{0}' not found in object")]
    ProgramNotFound(&'static str),

    #[error("eBPF program '{name}' could not be attached to {iface}: {source}")]
    Program {
        name: &'static str,
        iface: String,
        #[source]
        source: ProgramError,
    },

    #[error("map '{0}' not found in object")]
    MapNotFound(&'static str),

    #[error("map '{name}' has an unexpected type: {source}")]
    Map {
        name: &'static str,
        #[source]
        source: MapError,
    },

    #[error("failed to open packet reader: {0}")]
    Reader(#[from] ReadError),
}

/// Raises the memlock rlimit. Kernels without memcg based accounting charge BPF
/// maps against it.
pub fn raise_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: rlim is a valid rlimit that outlives the call.
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!(
            event.name = "system.rlimit_failed",
            system.rlimit.type = "memlock",
            error.code = ret,
            "failed to remove limit on locked memory"
        );
    }
}

/// Loads `object_path`, attaches the XDP program of `mode` to `iface` and opens
/// the matching reader.
///
/// The returned [`Ebpf`] owns the attached program; dropping it detaches the
/// program and unloads the maps. It must outlive the reader.
///
/// Must be called from within a tokio runtime.
pub fn load_and_attach(
    object_path: &Path,
    iface: &str,
    mode: DeliveryMode,
    perf_options: PerfOptions,
) -> Result<(Ebpf, Reader), AttachError> {
    // Kernels without ring buffer support reject the ring map at load time
    // unless unsupported map types are skipped.
    let mut ebpf = EbpfLoader::new()
        .allow_unsupported_maps()
        .load_file(object_path)
        .map_err(|e| AttachError::Load {
            path: object_path.to_path_buf(),
            source: Box::new(e),
        })?;

    attach_program(&mut ebpf, mode.program_name(), iface)?;
    debug!(
        event.name = "ebpf.program_skipped",
        ebpf.program = mode.excluded_program_name(),
        delivery.mode = %mode,
        "leaving program of the other delivery mode detached"
    );

    let map_name = mode.map_name();
    let map = ebpf
        .take_map(map_name)
        .ok_or(AttachError::MapNotFound(map_name))?;
    let map_err = |source: MapError| AttachError::Map {
        name: map_name,
        source,
    };

    let reader = match mode {
        DeliveryMode::RingBuffer => {
            let ring_buf = RingBuf::try_from(map).map_err(map_err)?;
            Reader::from(RingBufReader::new(ring_buf)?)
        }
        DeliveryMode::PerfBuffer => {
            let array = AsyncPerfEventArray::try_from(map).map_err(map_err)?;
            Reader::from(PerfBufReader::open(array, perf_options)?)
        }
    };

    info!(
        event.name = "ebpf.attached",
        ebpf.program = mode.program_name(),
        ebpf.map = map_name,
        network.interface.name = iface,
        delivery.mode = %mode,
        "eBPF program attached, waiting for packets"
    );

    Ok((ebpf, reader))
}

fn attach_program(ebpf: &mut Ebpf, name: &'static str, iface: &str) -> Result<(), AttachError> {
    let program_err = |source: ProgramError| AttachError::Program {
        name,
        iface: iface.to_string(),
        source,
    };

    let program: &mut Xdp = ebpf
        .program_mut(name)
        .ok_or(AttachError::ProgramNotFound(name))?
        .try_into()
        .map_err(program_err)?;
    program.load().map_err(program_err)?;
    program
        .attach(iface, XdpFlags::default())
        .map_err(program_err)?;

    Ok(())
}
