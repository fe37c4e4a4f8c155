//! Floodlight adapter for labgated
//!
//! Implements the controller trait against the Floodlight REST API:
//! - Device listing for attachment point lookup
//! - Static flow pusher for rule install and removal

mod client;
mod devices;

pub use client::*;
pub use devices::*;
