//! HTTP API Module
//!
//! Dashboard data, health and metrics endpoints.

mod routes;
mod metrics;

pub use routes::run_api_server;
pub use metrics::Metrics;
