//! HTTP API for continuous mode

pub mod health;
pub mod records;

pub use health::health_routes;
pub use records::record_routes;
