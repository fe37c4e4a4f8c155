//! SDN controller adapter interfaces for labgated
//!
//! This crate defines the interface between the connection manager and a
//! concrete controller (attachment lookup, rule push, rule delete), the
//! rule descriptors exchanged across it, and a mock for tests. It contains
//! no HTTP code itself.

mod flow;
mod mock;
mod traits;

pub use flow::*;
pub use mock::*;
pub use traits::*;
