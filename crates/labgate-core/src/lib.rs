//! Core policy engine and connection state machine for labgated
//!
//! This crate is the heart of labgated, containing:
//! - Authorization (which students may reach which services, via active courses)
//! - Flow building (the four forwarding/ARP rules of a session)
//! - Connection state machine (Requested -> Authorized -> AttachmentResolved -> RulesInstalled -> Terminated)
//! - The session table that makes teardown exact

mod authz;
mod flows;
mod manager;
mod session;

pub use authz::*;
pub use flows::*;
pub use manager::*;
pub use session::*;
