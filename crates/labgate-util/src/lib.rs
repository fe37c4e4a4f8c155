//! Shared utilities for labgate
//!
//! This crate provides:
//! - ID types (StudentId, Handler, ClientId)
//! - Hardware address parsing
//! - Default paths for socket, data, and snapshot files

mod ids;
mod mac;
mod paths;

pub use ids::*;
pub use mac::*;
pub use paths::*;

use chrono::{DateTime, Local};

/// Current wall-clock time
pub fn now() -> DateTime<Local> {
    Local::now()
}
