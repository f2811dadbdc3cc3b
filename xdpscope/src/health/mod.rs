//! HTTP API exposing liveness, readiness and Prometheus metrics.

mod error;
mod handlers;

pub use error::HealthError;
pub use handlers::{
    HealthState, create_health_router, liveness_handler, metrics_handler, readiness_handler,
    start_api_server,
};
