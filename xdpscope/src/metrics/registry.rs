//! Global metrics registry and collector definitions.
//!
//! This module defines all Prometheus metrics used by xdpscope and provides
//! a centralized registry for metric collection.

use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGaugeVec, Opts, Registry};

static INITIALIZED: Mutex<bool> = Mutex::new(false);

lazy_static! {
    /// Global Prometheus registry for all xdpscope metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Ingestion Metrics
    // ============================================================================

    /// Raw records returned by the active reader, before decoding.
    pub static ref INGEST_RECORDS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("records_total", "Total number of raw records read from the shared buffer")
            .namespace("xdpscope")
            .subsystem("ingest")
    ).expect("failed to create ingest_records_total metric");

    pub static ref INGEST_PACKETS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("packets_total", "Total number of decoded packets forwarded to the sink")
            .namespace("xdpscope")
            .subsystem("ingest")
    ).expect("failed to create ingest_packets_total metric");

    pub static ref INGEST_MALFORMED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("malformed_total", "Total number of records skipped because they failed to decode")
            .namespace("xdpscope")
            .subsystem("ingest")
    ).expect("failed to create ingest_malformed_total metric");

    pub static ref INGEST_READ_ERRORS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("read_errors_total", "Total number of transient errors returned by the reader")
            .namespace("xdpscope")
            .subsystem("ingest")
    ).expect("failed to create ingest_read_errors_total metric");

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Samples the kernel dropped because a per-CPU perf buffer was full.
    pub static ref PERF_LOST_SAMPLES_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("lost_samples_total", "Total number of samples lost by per-cpu perf buffers")
            .namespace("xdpscope")
            .subsystem("perf")
    ).expect("failed to create perf_lost_samples_total metric");

    /// Set to 1 for the delivery mode selected at startup.
    pub static ref DELIVERY_MODE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("mode", "Packet delivery mode selected at startup (ring_buffer or perf_buffer)")
            .namespace("xdpscope")
            .subsystem("delivery"),
        &["mode"]
    ).expect("failed to create delivery_mode metric");
}

macro_rules! register {
    ($metric:expr) => {{
        REGISTRY.register(Box::new($metric.clone()))?;
    }};
}

/// Initialize the metrics registry by registering all collectors.
///
/// Calling it again after a successful initialization is a no-op. Concurrent
/// callers are serialized, so only the first one registers.
///
/// # Errors
///
/// Returns [`prometheus::Error`] if a metric with the same name is already
/// registered.
pub fn init_registry() -> Result<(), prometheus::Error> {
    let mut initialized = INITIALIZED.lock().unwrap_or_else(PoisonError::into_inner);
    if *initialized {
        return Ok(());
    }

    register!(INGEST_RECORDS_TOTAL);
    register!(INGEST_PACKETS_TOTAL);
    register!(INGEST_MALFORMED_TOTAL);
    register!(INGEST_READ_ERRORS_TOTAL);
    register!(PERF_LOST_SAMPLES_TOTAL);
    register!(DELIVERY_MODE);

    *initialized = true;
    Ok(())
}

/// Encodes every registered collector in the Prometheus text format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    encoder.encode_to_string(&REGISTRY.gather())
}
