//! Client-side cache coordination for multi-tenant restaurant kiosks.
//!
//! The [`cache`] module is the library proper. The remaining modules back the
//! `kiosk-cache` operator binary.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
