//! Controller adapter traits

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

use crate::{AttachmentPoint, FlowRule};

/// Errors from controller operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// The controller knows no device with this address
    #[error("No attachment point known for {0}")]
    NotFound(Ipv4Addr),

    #[error("Controller unreachable: {0}")]
    Unreachable(String),

    #[error("Controller did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Controller rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected controller response: {0}")]
    Protocol(String),
}

impl ControllerError {
    /// True when the controller itself could not be talked to
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControllerError::Unreachable(_) | ControllerError::Timeout(_))
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Controller adapter trait - implemented by concrete SDN controllers
#[async_trait]
pub trait Controller: Send + Sync {
    /// Find the switch and port through which `address` is reachable
    async fn resolve_attachment(&self, address: Ipv4Addr) -> ControllerResult<AttachmentPoint>;

    /// Install a rule; the rule name is its identity on the controller
    async fn push_rule(&self, rule: &FlowRule) -> ControllerResult<()>;

    /// Remove a rule by name
    async fn delete_rule(&self, name: &str) -> ControllerResult<()>;

    /// Optional: check if the controller answers
    async fn is_healthy(&self) -> bool {
        true
    }
}
