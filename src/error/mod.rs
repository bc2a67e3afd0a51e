// src/error/mod.rs
//
// Error types for the data access layer

pub mod types;

pub use types::{DataError, DataResult};
