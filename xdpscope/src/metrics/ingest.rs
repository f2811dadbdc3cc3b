//! Helper functions for ingestion-related metrics.

use crate::{metrics::registry, source::mode::DeliveryMode};

/// Increment the raw record counter.
pub fn inc_records() {
    registry::INGEST_RECORDS_TOTAL.inc();
}

/// Increment the decoded packet counter.
pub fn inc_packets() {
    registry::INGEST_PACKETS_TOTAL.inc();
}

/// Increment the malformed record counter.
pub fn inc_malformed() {
    registry::INGEST_MALFORMED_TOTAL.inc();
}

/// Increment the transient read error counter.
pub fn inc_read_errors() {
    registry::INGEST_READ_ERRORS_TOTAL.inc();
}

/// Add samples reported lost by a per-CPU perf buffer.
///
/// ### Arguments:
///
/// - `count` - Number of samples the kernel dropped since the last read
pub fn inc_perf_lost_samples(count: u64) {
    registry::PERF_LOST_SAMPLES_TOTAL.inc_by(count);
}

/// Record the delivery mode chosen at startup.
///
/// ### Arguments:
///
/// - `mode` - The selected mode; its gauge is set to 1, the other to 0
pub fn set_delivery_mode(mode: DeliveryMode) {
    for candidate in [DeliveryMode::RingBuffer, DeliveryMode::PerfBuffer] {
        registry::DELIVERY_MODE
            .with_label_values(&[candidate.as_str()])
            .set(i64::from(candidate == mode));
    }
}
