//! Restaurant records the cache stores.

pub mod entities;
