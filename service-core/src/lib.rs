pub mod api;
pub mod auth;
pub mod config;
pub mod batch_logger;
pub mod metrics;
pub mod router;
pub mod telemetry;
