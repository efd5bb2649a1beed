#![forbid(unsafe_code)]

//! Offline storage for the aulos streaming core.
//!
//! [`DbEngine`] wraps a local SQLite database in the narrow shape the
//! offline module needs: named stores of opaque blobs keyed by `u64`,
//! one transaction per operation, monotonic ID reservation, and
//! abort-everything teardown.

pub mod engine;
pub mod error;

pub use engine::DbEngine;
pub use error::{DbError, DbResult};
