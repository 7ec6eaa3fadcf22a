//! Application layer: stack wiring, operator commands and top-level errors.

pub mod commands;
pub mod context;
pub mod error;
