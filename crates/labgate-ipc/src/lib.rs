//! IPC layer for labgated
//!
//! One JSON document per line over a Unix domain socket. The server derives
//! each client's role from its peer credentials and pushes events to
//! clients that subscribed.

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server error: {0}")]
    ServerError(String),
}

pub type IpcResult<T> = Result<T, IpcError>;
