//! Capability checking for required Linux capabilities.
//!
//! xdpscope needs the following to load its probe and read the shared buffers:
//! - CAP_BPF: Load eBPF programs and create maps (kernel >= 5.8)
//! - CAP_PERFMON: Open per-CPU perf event buffers (kernel >= 5.8)
//! - CAP_NET_ADMIN: Attach XDP programs to network interfaces
//! - CAP_SYS_RESOURCE: Raise the memlock rlimit on older kernels
//!
//! On kernels older than 5.8, CAP_SYS_ADMIN stands in for CAP_BPF and CAP_PERFMON.

use std::fs;

use tracing::{debug, warn};

use crate::error::{Result, XdpscopeError};

/// Linux capability constants from <linux/capability.h>
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    NetAdmin = 12,
    SysAdmin = 21,
    SysResource = 24,
    Perfmon = 38,
    Bpf = 39,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::NetAdmin => "CAP_NET_ADMIN",
            Capability::SysAdmin => "CAP_SYS_ADMIN",
            Capability::SysResource => "CAP_SYS_RESOURCE",
            Capability::Perfmon => "CAP_PERFMON",
            Capability::Bpf => "CAP_BPF",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Capability::NetAdmin => "attach XDP programs to network interfaces",
            Capability::SysAdmin => "load eBPF programs on kernels older than 5.8",
            Capability::SysResource => "modify resource limits (e.g., memlock rlimit)",
            Capability::Perfmon => "open per-cpu perf event buffers",
            Capability::Bpf => "load eBPF programs and create maps",
        }
    }

    /// Introduced in 5.8; CAP_SYS_ADMIN covers it on older kernels.
    fn has_sys_admin_fallback(&self) -> bool {
        matches!(self, Capability::Perfmon | Capability::Bpf)
    }
}

const REQUIRED_CAPABILITIES: [Capability; 4] = [
    Capability::Bpf,
    Capability::NetAdmin,
    Capability::Perfmon,
    Capability::SysResource,
];

/// Extracts the effective capability mask from the contents of `/proc/self/status`.
fn effective_capabilities(status: &str) -> Result<u64> {
    for line in status.lines() {
        if let Some(caps_hex) = line.strip_prefix("CapEff:").map(str::trim) {
            return u64::from_str_radix(caps_hex, 16).map_err(|e| {
                XdpscopeError::internal(format!(
                    "failed to parse capability mask '{caps_hex}': {e}"
                ))
            });
        }
    }

    Err(XdpscopeError::internal(
        "CapEff line not found in /proc/self/status",
    ))
}

fn has_capability(mask: u64, cap: Capability) -> bool {
    mask & (1u64 << (cap as u32)) != 0
}

/// Returns the required capabilities missing from `mask`, honoring the
/// CAP_SYS_ADMIN fallback for capabilities introduced in 5.8.
fn missing_capabilities(mask: u64) -> Vec<Capability> {
    let sys_admin = has_capability(mask, Capability::SysAdmin);
    let mut missing = Vec::new();

    for cap in REQUIRED_CAPABILITIES {
        if has_capability(mask, cap) {
            debug!(
                event.name = "capabilities.present",
                capability = cap.name(),
                "capability is present"
            );
            continue;
        }

        if cap.has_sys_admin_fallback() && sys_admin {
            warn!(
                event.name = "capabilities.missing_fallback",
                capability = cap.name(),
                description = cap.description(),
                "capability not found, relying on CAP_SYS_ADMIN"
            );
            continue;
        }

        missing.push(cap);
    }

    missing
}

/// Check all required capabilities at startup.
/// Returns a detailed error if any required capabilities are missing.
pub fn check_required_capabilities() -> Result<()> {
    let status = fs::read_to_string("/proc/self/status").map_err(|e| {
        XdpscopeError::internal(format!("failed to read /proc/self/status: {e}"))
    })?;
    let mask = effective_capabilities(&status)?;

    let missing = missing_capabilities(mask);
    if missing.is_empty() {
        return Ok(());
    }

    let mut error_msg = String::from("missing required capabilities:\n\n");
    for cap in missing {
        error_msg.push_str(&format!(
            "  {} - required to {}\n",
            cap.name(),
            cap.description()
        ));
    }
    error_msg.push_str("\nrun as root (sudo xdpscope) or grant the capabilities above");
    Err(XdpscopeError::internal(error_msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_of(caps: &[Capability]) -> u64 {
        caps.iter().fold(0, |mask, cap| mask | 1u64 << (*cap as u32))
    }

    #[test]
    #[ignore] // Only works when running with appropriate capabilities
    fn test_check_capabilities() {
        check_required_capabilities().expect("required capabilities should be present");
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::NetAdmin.name(), "CAP_NET_ADMIN");
        assert_eq!(Capability::Perfmon.name(), "CAP_PERFMON");
        assert_eq!(Capability::Bpf.name(), "CAP_BPF");
    }

    #[test]
    fn test_effective_capabilities_parses_status() {
        let status = "Name:\txdpscope\nCapInh:\t0000000000000000\nCapEff:\t000001ffffffffff\n";
        assert_eq!(effective_capabilities(status).unwrap(), 0x1ff_ffff_ffff);
    }

    #[test]
    fn test_effective_capabilities_without_cap_eff() {
        assert!(effective_capabilities("Name:\txdpscope\n").is_err());
        assert!(effective_capabilities("CapEff:\tnot-hex\n").is_err());
    }

    #[test]
    fn test_all_required_present() {
        assert!(missing_capabilities(mask_of(&REQUIRED_CAPABILITIES)).is_empty());
    }

    #[test]
    fn test_sys_admin_covers_bpf_and_perfmon() {
        let mask = mask_of(&[
            Capability::SysAdmin,
            Capability::NetAdmin,
            Capability::SysResource,
        ]);
        assert!(missing_capabilities(mask).is_empty());
    }

    #[test]
    fn test_reports_missing_capabilities() {
        let missing = missing_capabilities(mask_of(&[Capability::Bpf, Capability::Perfmon]));
        assert_eq!(
            missing,
            vec![Capability::NetAdmin, Capability::SysResource]
        );
    }
}
