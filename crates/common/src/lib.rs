//! Shared error taxonomy and identifier helpers used across all vision crates.

pub mod error;
pub mod ids;
pub mod time;

pub use {
    error::{Error, ErrorKind, Result},
    ids::{new_id, short_id},
    time::{now_ms, to_rfc3339},
};
