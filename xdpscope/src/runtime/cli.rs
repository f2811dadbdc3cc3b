use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::{runtime::conf::conf_serde::level, source::mode::DeliveryPreference};

/// Command line arguments. Every flag can also be set through its `XDPSCOPE_*`
/// environment variable; flags left unset fall through to the configuration file.
#[derive(Parser, Debug, Default, Serialize, Deserialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set the path to the configuration file (e.g., "config.yaml").
    #[arg(short, long, value_name = "FILE", env = "XDPSCOPE_CONFIG_PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Set the application's log level (e.g., "debug", "warn").
    #[arg(short, long, value_name = "LEVEL", env = "XDPSCOPE_LOG_LEVEL")]
    #[serde(
        with = "level::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub log_level: Option<Level>,

    /// Network interface the XDP program is attached to.
    #[arg(short, long, value_name = "IFACE", env = "XDPSCOPE_INTERFACE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Path to the compiled eBPF object file.
    #[arg(long = "object", value_name = "PATH", env = "XDPSCOPE_OBJECT_PATH")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_path: Option<PathBuf>,

    /// Packet delivery mechanism; `auto` probes the kernel for ring buffer support.
    #[arg(short, long, value_enum, value_name = "MODE", env = "XDPSCOPE_DELIVERY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryPreference>,
}
