//! Prometheus metrics for the ingestion pipeline.
//!
//! Collectors live in `registry`; `ingest` holds the helpers the pipeline calls.

pub mod ingest;
pub mod registry;
