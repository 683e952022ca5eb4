pub mod config;
pub mod errors;
pub mod metrics;
pub mod platform;
pub mod telemetry;
