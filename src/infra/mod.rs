//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod fixtures;
pub mod store;
pub mod telemetry;
